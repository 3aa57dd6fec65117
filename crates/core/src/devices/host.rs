//! System audio devices through cpal.
//!
//! Microphone capture and media playback use the default host devices.
//! There is no camera capture in the audio stack, so camera requests go to
//! a fallback backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use super::TAP_CAPACITY;
use crate::audio::{sample_tap, AudioInput, AudioSignalHandle, AudioSourceKind, SampleTap};
use crate::lifecycle::DeviceBackend;
use crate::media::MediaElement;
use crate::video::{CameraStream, Resolution};
use crate::{MotionLabError, Result};

pub struct HostBackend {
    camera: Box<dyn DeviceBackend>,
}

impl HostBackend {
    pub fn new(camera: Box<dyn DeviceBackend>) -> Self {
        Self { camera }
    }
}

impl DeviceBackend for HostBackend {
    fn open_microphone(&mut self) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(MicrophoneInput::open()?))
    }

    fn open_camera(&mut self, requested: Resolution) -> Result<Box<dyn CameraStream>> {
        self.camera.open_camera(requested)
    }

    fn open_playback(&mut self, media: &MediaElement) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(SpeakerPlayback::open(media)?))
    }
}

impl std::fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostBackend").finish_non_exhaustive()
    }
}

fn unavailable(context: &str, err: impl std::fmt::Display) -> MotionLabError {
    MotionLabError::ResourceUnavailable(format!("{context}: {err}"))
}

struct MicrophoneInput {
    stream: Option<Stream>,
    tap: SampleTap,
    sample_rate: u32,
    label: String,
}

impl MicrophoneInput {
    fn open() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| MotionLabError::ResourceUnavailable("no input device".into()))?;
        let label = device.name().unwrap_or_else(|_| "microphone".to_string());
        let supported = device
            .default_input_config()
            .map_err(|err| unavailable("input config", err))?;
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels);
        let (writer, tap) = sample_tap(TAP_CAPACITY);

        // Callbacks only touch the lock-free writer.
        let on_error = |err: cpal::StreamError| tracing::error!(%err, "microphone stream error");
        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let mut writer = writer;
                device.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        writer.push_interleaved(data, channels)
                    },
                    on_error,
                    None,
                )
            }
            SampleFormat::I16 => {
                let mut writer = writer;
                device.build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        writer.push_frames(data, channels, |s| f32::from(s) / f32::from(i16::MAX))
                    },
                    on_error,
                    None,
                )
            }
            other => {
                return Err(MotionLabError::ResourceUnavailable(format!(
                    "unsupported input sample format {other:?}"
                )))
            }
        }
        .map_err(|err| unavailable("input stream", err))?;

        tracing::info!(device = %label, rate = config.sample_rate.0, channels, "microphone opened");
        Ok(Self {
            stream: Some(stream),
            tap,
            sample_rate: config.sample_rate.0,
            label,
        })
    }
}

impl AudioInput for MicrophoneInput {
    fn signal(&self) -> AudioSignalHandle {
        AudioSignalHandle::new(
            self.tap.clone(),
            self.sample_rate,
            AudioSourceKind::Microphone,
            self.label.clone(),
        )
    }

    fn resume(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| MotionLabError::ResourceUnavailable("microphone closed".into()))?;
        stream.play().map_err(|err| unavailable("microphone", err))
    }

    fn close(&mut self) {
        if self.stream.take().is_some() {
            tracing::debug!(device = %self.label, "microphone closed");
        }
        self.tap.close();
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}

struct SpeakerPlayback {
    stream: Option<Stream>,
    tap: SampleTap,
    device_rate: u32,
    label: String,
}

impl SpeakerPlayback {
    fn open(media: &MediaElement) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| MotionLabError::ResourceUnavailable("no output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|err| unavailable("output config", err))?;
        if supported.sample_format() != SampleFormat::F32 {
            return Err(MotionLabError::ResourceUnavailable(format!(
                "unsupported output sample format {:?}",
                supported.sample_format()
            )));
        }
        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels).max(1);
        let audio = media.audio();
        let (mut played, tap) = sample_tap(TAP_CAPACITY);

        // Nearest-sample rate conversion from the media rate to the device rate.
        let step = f64::from(audio.sample_rate()) / f64::from(config.sample_rate.0);
        let samples = audio.samples().clone();
        let cursor = Arc::new(AtomicUsize::new(0));
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let start = cursor.load(Ordering::Relaxed);
                    let frames = data.len() / channels;
                    for (i, frame) in data.chunks_mut(channels).enumerate() {
                        let index = ((start + i) as f64 * step) as usize;
                        let sample = samples.get(index).copied().unwrap_or(0.0);
                        frame.iter_mut().for_each(|out| *out = sample);
                    }
                    cursor.store(start + frames, Ordering::Relaxed);
                    // Every channel carries the same sample, so the downmix is the mono signal.
                    played.push_interleaved(data, channels);
                },
                |err: cpal::StreamError| tracing::error!(%err, "playback stream error"),
                None,
            )
            .map_err(|err| unavailable("output stream", err))?;
        // Some hosts start streams on creation; playback waits for resume.
        if let Err(err) = stream.pause() {
            tracing::debug!(%err, "output stream cannot pause");
        }

        Ok(Self {
            stream: Some(stream),
            tap,
            device_rate: config.sample_rate.0,
            label: media.name().to_string(),
        })
    }
}

impl AudioInput for SpeakerPlayback {
    fn signal(&self) -> AudioSignalHandle {
        AudioSignalHandle::new(
            self.tap.clone(),
            self.device_rate,
            AudioSourceKind::Media,
            self.label.clone(),
        )
    }

    fn resume(&mut self) -> Result<()> {
        let stream = self
            .stream
            .as_ref()
            .ok_or_else(|| MotionLabError::ResourceUnavailable("playback closed".into()))?;
        stream.play().map_err(|err| unavailable("playback", err))
    }

    fn close(&mut self) {
        self.stream = None;
        self.tap.close();
    }

    fn is_closed(&self) -> bool {
        self.stream.is_none()
    }
}
