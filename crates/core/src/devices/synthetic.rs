//! Hardware-free devices: a sine tone standing in for the microphone, a
//! moving test pattern standing in for the camera, wall-clock playback of
//! decoded media and a mannequin pose detector.

use std::f32::consts::TAU;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use super::{should_stop, Worker, TAP_CAPACITY};
use crate::audio::{
    sample_tap, AudioInput, AudioSignalHandle, AudioSourceKind, SampleTap, TapWriter,
};
use crate::lifecycle::{DeviceBackend, DeviceKind};
use crate::media::{DecodedAudio, MediaElement};
use crate::pose::{EstimateOptions, Landmark, PoseDetector, Subject};
use crate::video::{video_feed, CameraStream, Resolution, VideoFrame, VideoSource};
use crate::{MotionLabError, PoseConfig, Result};

const AUDIO_PERIOD: Duration = Duration::from_millis(10);
const CAMERA_PERIOD: Duration = Duration::from_millis(33);

#[derive(Debug, Clone)]
pub struct SyntheticOptions {
    /// Refuse microphone requests as a user would.
    pub deny_microphone: bool,
    pub deny_camera: bool,
    /// Fail the first playback resume, as hosts do before a user gesture.
    pub block_autoplay: bool,
    pub tone_hz: f32,
    pub sample_rate: u32,
    /// Resolution the camera grants regardless of the request.
    pub granted: Option<Resolution>,
    pub playback_chunk: usize,
}

impl Default for SyntheticOptions {
    fn default() -> Self {
        Self {
            deny_microphone: false,
            deny_camera: false,
            block_autoplay: false,
            tone_hz: 220.0,
            sample_rate: 48_000,
            granted: None,
            playback_chunk: 512,
        }
    }
}

#[derive(Debug, Default)]
pub struct SyntheticBackend {
    options: SyntheticOptions,
}

impl SyntheticBackend {
    pub fn new(options: SyntheticOptions) -> Self {
        Self { options }
    }
}

impl DeviceBackend for SyntheticBackend {
    fn open_microphone(&mut self) -> Result<Box<dyn AudioInput>> {
        if self.options.deny_microphone {
            return Err(MotionLabError::PermissionDenied(DeviceKind::Microphone));
        }
        Ok(Box::new(ToneInput::new(
            self.options.tone_hz,
            self.options.sample_rate,
        )))
    }

    fn open_camera(&mut self, requested: Resolution) -> Result<Box<dyn CameraStream>> {
        if self.options.deny_camera {
            return Err(MotionLabError::PermissionDenied(DeviceKind::Camera));
        }
        let granted = self.options.granted.unwrap_or(requested);
        Ok(Box::new(TestPatternCamera::open(granted)?))
    }

    fn open_playback(&mut self, media: &MediaElement) -> Result<Box<dyn AudioInput>> {
        Ok(Box::new(ClockedPlayback::new(
            media.name(),
            media.audio().clone(),
            self.options.playback_chunk,
            self.options.block_autoplay,
        )))
    }
}

/// Sine tone delivered in 10 ms blocks once resumed.
struct ToneInput {
    tap: SampleTap,
    writer: Option<TapWriter>,
    sample_rate: u32,
    frequency: f32,
    worker: Option<Worker>,
    closed: bool,
}

impl ToneInput {
    fn new(frequency: f32, sample_rate: u32) -> Self {
        let (writer, tap) = sample_tap(TAP_CAPACITY);
        Self {
            tap,
            writer: Some(writer),
            sample_rate,
            frequency,
            worker: None,
            closed: false,
        }
    }
}

impl AudioInput for ToneInput {
    fn signal(&self) -> AudioSignalHandle {
        AudioSignalHandle::new(
            self.tap.clone(),
            self.sample_rate,
            AudioSourceKind::Microphone,
            "synthetic tone",
        )
    }

    fn resume(&mut self) -> Result<()> {
        if self.closed {
            return Err(MotionLabError::ResourceUnavailable("tone input closed".into()));
        }
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let rate = self.sample_rate as f32;
        let step = TAU * self.frequency / rate;
        let block = (self.sample_rate / 100).max(1) as usize;
        self.worker = Some(Worker::spawn("synthetic-tone", move |stop: Arc<AtomicBool>| {
            let mut phase = 0.0_f32;
            let mut samples = vec![0.0; block];
            while !should_stop(&stop) {
                for sample in samples.iter_mut() {
                    *sample = 0.5 * phase.sin();
                    phase = (phase + step) % TAU;
                }
                writer.push(&samples);
                thread::sleep(AUDIO_PERIOD);
            }
        })?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.tap.close();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Plays decoded media into a tap at wall-clock pace, then silence.
struct ClockedPlayback {
    label: String,
    audio: DecodedAudio,
    tap: SampleTap,
    writer: Option<TapWriter>,
    chunk: usize,
    refuse_next: bool,
    worker: Option<Worker>,
    closed: bool,
}

impl ClockedPlayback {
    fn new(label: &str, audio: DecodedAudio, chunk: usize, block_autoplay: bool) -> Self {
        let (writer, tap) = sample_tap(TAP_CAPACITY);
        Self {
            label: label.to_string(),
            audio,
            tap,
            writer: Some(writer),
            chunk: chunk.max(1),
            refuse_next: block_autoplay,
            worker: None,
            closed: false,
        }
    }
}

impl AudioInput for ClockedPlayback {
    fn signal(&self) -> AudioSignalHandle {
        AudioSignalHandle::new(
            self.tap.clone(),
            self.audio.sample_rate(),
            AudioSourceKind::Media,
            self.label.clone(),
        )
    }

    fn resume(&mut self) -> Result<()> {
        if self.closed {
            return Err(MotionLabError::ResourceUnavailable("playback closed".into()));
        }
        if self.refuse_next {
            self.refuse_next = false;
            return Err(MotionLabError::ResourceUnavailable(
                "playback requires a user gesture".into(),
            ));
        }
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let samples = self.audio.samples().clone();
        let chunk = self.chunk;
        let period = Duration::from_secs_f64(chunk as f64 / f64::from(self.audio.sample_rate()));
        self.worker = Some(Worker::spawn("synthetic-playback", move |stop: Arc<AtomicBool>| {
            let silence = vec![0.0; chunk];
            let mut position = 0;
            while !should_stop(&stop) {
                if position < samples.len() {
                    let end = (position + chunk).min(samples.len());
                    writer.push(&samples[position..end]);
                    position = end;
                } else {
                    writer.push(&silence);
                }
                thread::sleep(period);
            }
        })?);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
        self.tap.close();
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Diagonal gradient with a sweeping bright column, about 30 frames a second.
struct TestPatternCamera {
    source: VideoSource,
    worker: Option<Worker>,
}

impl TestPatternCamera {
    fn open(granted: Resolution) -> Result<Self> {
        let (sink, source) = video_feed(granted);
        let worker = Worker::spawn("synthetic-camera", move |stop: Arc<AtomicBool>| {
            let mut sequence = 0;
            while !should_stop(&stop) {
                sequence += 1;
                if let Some(frame) = test_pattern(granted, sequence) {
                    sink.push(frame);
                }
                thread::sleep(CAMERA_PERIOD);
            }
            sink.close();
        })?;
        Ok(Self {
            source,
            worker: Some(worker),
        })
    }
}

fn test_pattern(resolution: Resolution, sequence: u64) -> Option<VideoFrame> {
    let Resolution { width, height } = resolution;
    let column = (sequence % u64::from(width.max(1))) as u32;
    let mut pixels = Vec::with_capacity(width as usize * height as usize * 3);
    for y in 0..height {
        for x in 0..width {
            let shade = ((x + y) * 255 / (width + height).max(1)) as u8;
            if x == column {
                pixels.extend_from_slice(&[255, 255, 255]);
            } else {
                pixels.extend_from_slice(&[shade, shade / 2, 255 - shade]);
            }
        }
    }
    VideoFrame::from_rgb(width, height, pixels, sequence)
}

impl CameraStream for TestPatternCamera {
    fn source(&self) -> VideoSource {
        self.source.clone()
    }

    fn close(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.stop();
        }
    }

    fn is_closed(&self) -> bool {
        self.worker.is_none()
    }
}

// Normalised rest pose in keypoint order.
const REST_POSE: [(f32, f32); 17] = [
    (0.50, 0.20),
    (0.47, 0.18),
    (0.53, 0.18),
    (0.44, 0.20),
    (0.56, 0.20),
    (0.40, 0.32),
    (0.60, 0.32),
    (0.35, 0.45),
    (0.65, 0.45),
    (0.33, 0.58),
    (0.67, 0.58),
    (0.44, 0.60),
    (0.56, 0.60),
    (0.44, 0.76),
    (0.56, 0.76),
    (0.44, 0.92),
    (0.56, 0.92),
];

/// Detector that always reports one swaying figure. Lets the whole pipeline
/// run without a model file.
#[derive(Debug, Default)]
pub struct MannequinDetector {
    estimates: u64,
}

impl MannequinDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(_config: &PoseConfig) -> Result<Box<dyn PoseDetector>> {
        Ok(Box::new(Self::new()))
    }
}

impl PoseDetector for MannequinDetector {
    fn estimate(&mut self, frame: &VideoFrame, options: &EstimateOptions) -> Result<Vec<Subject>> {
        self.estimates += 1;
        let width = frame.width as f32;
        let height = frame.height as f32;
        let sway = (frame.sequence as f32 * 0.1).sin() * 0.03;

        let keypoints = REST_POSE
            .iter()
            .map(|&(x, y)| {
                let x = (x + sway * y) * width;
                let x = if options.mirror { width - x } else { x };
                Landmark::new(x, y * height, 0.9)
            })
            .collect();
        Ok(vec![Subject {
            keypoints,
            score: Some(0.9),
        }])
    }

    fn reset(&mut self) {
        self.estimates = 0;
    }
}
