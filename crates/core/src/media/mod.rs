//! Decodable media elements backing file playback.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::{MotionLabError, Result};

/// Fully decoded mono audio.
#[derive(Clone)]
pub struct DecodedAudio {
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(MotionLabError::Decode("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(MotionLabError::Decode("media contains no audio frames".into()));
        }
        Ok(Self {
            samples: samples.into(),
            sample_rate,
        })
    }

    pub fn samples(&self) -> &Arc<[f32]> {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

impl std::fmt::Debug for DecodedAudio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedAudio")
            .field("frames", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}

/// Decodes the first audio track of `path` and downmixes it to mono.
pub fn decode_file(path: &Path) -> Result<DecodedAudio> {
    let file = File::open(path)
        .map_err(|err| MotionLabError::Decode(format!("{}: {err}", path.display())))?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        stream,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| MotionLabError::Decode("no decodable audio track".into()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| MotionLabError::Decode("audio track has no sample rate".into()))?;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut mono = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(err) => return Err(err.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(reason)) => {
                tracing::debug!(reason, "skipping undecodable packet");
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let capacity = decoded.capacity();
        if buffer
            .as_ref()
            .map_or(true, |buffer| buffer.capacity() < capacity * channels)
        {
            buffer = Some(SampleBuffer::new(capacity as u64, spec));
        }
        if let Some(buffer) = buffer.as_mut() {
            buffer.copy_interleaved_ref(decoded);
            mono.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / channels as f32),
            );
        }
    }

    DecodedAudio::new(mono, sample_rate)
}

/// Tracks outstanding media resources so leaks and double releases are
/// visible.
#[derive(Clone, Default)]
pub struct MediaLedger {
    shared: Arc<Mutex<LedgerState>>,
}

#[derive(Default)]
struct LedgerState {
    next_id: u64,
    live: HashMap<u64, String>,
    releases: HashMap<u64, u32>,
}

impl MediaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, label: &str) -> MediaResource {
        let mut state = self.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.live.insert(id, label.to_string());
        MediaResource {
            id,
            ledger: self.clone(),
        }
    }

    fn release(&self, id: u64) {
        let mut state = self.lock();
        let count = state.releases.entry(id).or_insert(0);
        *count += 1;
        if *count > 1 {
            tracing::error!(id, "media resource released more than once");
        }
        if let Some(label) = state.live.remove(&id) {
            tracing::debug!(id, label, "released media resource");
        }
    }

    /// Number of resources acquired and not yet released.
    pub fn live(&self) -> usize {
        self.lock().live.len()
    }

    /// How many times resource `id` has been released.
    pub fn release_count(&self, id: u64) -> u32 {
        self.lock().releases.get(&id).copied().unwrap_or(0)
    }

    /// Logs a warning for every resource still held. Returns how many there
    /// were.
    pub fn report_leaks(&self) -> usize {
        let state = self.lock();
        for (id, label) in &state.live {
            tracing::warn!(id, label, "media resource still held at teardown");
        }
        state.live.len()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for MediaLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaLedger")
            .field("live", &self.live())
            .finish()
    }
}

/// Handle to loaded media data. Released exactly once, when dropped.
#[derive(Debug)]
pub struct MediaResource {
    id: u64,
    ledger: MediaLedger,
}

impl MediaResource {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for MediaResource {
    fn drop(&mut self) {
        self.ledger.release(self.id);
    }
}

/// A loaded, decodable media file ready for playback.
#[derive(Debug)]
pub struct MediaElement {
    name: String,
    audio: DecodedAudio,
    resource: MediaResource,
}

impl MediaElement {
    /// Decodes `path` and registers its resource with `ledger`.
    pub fn open(path: &Path, ledger: &MediaLedger) -> Result<Self> {
        let audio = decode_file(path)?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::from_decoded(name, audio, ledger))
    }

    pub fn from_decoded(
        name: impl Into<String>,
        audio: DecodedAudio,
        ledger: &MediaLedger,
    ) -> Self {
        let name = name.into();
        let resource = ledger.acquire(&name);
        Self {
            name,
            audio,
            resource,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn audio(&self) -> &DecodedAudio {
        &self.audio
    }

    pub fn resource_id(&self) -> u64 {
        self.resource.id()
    }
}
