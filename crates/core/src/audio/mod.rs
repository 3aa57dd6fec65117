use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rtrb::{Consumer, Producer, RingBuffer};

use crate::snapshot::{snapshot_cell, SnapshotReader, SnapshotWriter};
use crate::timeline::{FrameInfo, FrameScheduler, FrameTask, TaskControl, TaskId};
use crate::{AudioConfig, AudioFeatures, MotionLabError, Result, SpectralTransform};

/// Describes where an audio signal comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSourceKind {
    /// Live capture from the microphone.
    Microphone,
    /// Playback of a decoded media file.
    Media,
    /// Generated signal, used for demos and tests.
    Synthetic,
}

/// Creates a tap holding up to `capacity` mono samples.
///
/// The [`TapWriter`] belongs to the device callback and never blocks or
/// allocates. The [`SampleTap`] side drains it on the frame thread into a
/// history of the most recent samples.
pub fn sample_tap(capacity: usize) -> (TapWriter, SampleTap) {
    let capacity = capacity.max(1);
    let (producer, consumer) = RingBuffer::<f32>::new(capacity);
    let shared = Arc::new(TapShared {
        history: Mutex::new(TapHistory {
            consumer,
            ring: VecDeque::with_capacity(capacity),
            capacity,
        }),
        closed: AtomicBool::new(false),
        written: AtomicU64::new(0),
    });
    let writer = TapWriter {
        producer,
        shared: shared.clone(),
    };
    (writer, SampleTap { shared })
}

struct TapShared {
    history: Mutex<TapHistory>,
    closed: AtomicBool,
    written: AtomicU64,
}

struct TapHistory {
    consumer: Consumer<f32>,
    ring: VecDeque<f32>,
    capacity: usize,
}

/// Real-time end of a [`sample_tap`].
pub struct TapWriter {
    producer: Producer<f32>,
    shared: Arc<TapShared>,
}

impl TapWriter {
    /// Appends mono samples. Samples that do not fit before the next drain
    /// are dropped.
    pub fn push(&mut self, samples: &[f32]) {
        self.push_frames(samples, 1, |sample| sample);
    }

    /// Downmixes interleaved frames to mono before appending them.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) {
        self.push_frames(data, channels, |sample| sample);
    }

    /// Converts, downmixes and appends interleaved frames in one pass.
    pub fn push_frames<T: Copy>(
        &mut self,
        data: &[T],
        channels: usize,
        convert: impl Fn(T) -> f32,
    ) {
        if self.shared.closed.load(Ordering::Acquire) {
            return;
        }
        let mut pushed = 0_u64;
        for frame in data.chunks(channels.max(1)) {
            let sum: f32 = frame.iter().map(|&sample| convert(sample)).sum();
            if self.producer.push(sum / frame.len() as f32).is_err() {
                break;
            }
            pushed += 1;
        }
        self.shared.written.fetch_add(pushed, Ordering::Relaxed);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for TapWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapWriter")
            .field("free", &self.producer.slots())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Frame-thread end of a [`sample_tap`]: the most recent mono samples.
///
/// Clones share the same history. Memory is bounded by the capacity.
#[derive(Clone)]
pub struct SampleTap {
    shared: Arc<TapShared>,
}

impl SampleTap {
    /// Moves everything the writer has pushed into the history and returns
    /// how many samples were taken.
    pub fn drain(&self) -> usize {
        let mut history = self.lock();
        Self::drain_into(&mut history, self.is_closed())
    }

    /// Drains the writer, then fills `out` with the most recent samples,
    /// oldest first. Missing history is zero-padded at the front.
    pub fn copy_latest(&self, out: &mut [f32]) {
        let mut history = self.lock();
        Self::drain_into(&mut history, self.is_closed());
        let available = history.ring.len().min(out.len());
        let padding = out.len() - available;
        out[..padding].iter_mut().for_each(|value| *value = 0.0);
        let skip = history.ring.len() - available;
        for (slot, sample) in out[padding..].iter_mut().zip(history.ring.iter().skip(skip)) {
            *slot = *sample;
        }
    }

    pub fn frames_written(&self) -> u64 {
        self.shared.written.load(Ordering::Relaxed)
    }

    /// Marks the tap as released by its device. Further pushes are ignored.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        let mut history = self.lock();
        Self::drain_into(&mut history, true);
        history.ring.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn drain_into(history: &mut TapHistory, discard: bool) -> usize {
        let mut taken = 0;
        while let Ok(sample) = history.consumer.pop() {
            taken += 1;
            if discard {
                continue;
            }
            if history.ring.len() == history.capacity {
                history.ring.pop_front();
            }
            history.ring.push_back(sample);
        }
        taken
    }

    // Only the frame thread takes this lock; a panic mid-drain leaves a valid ring.
    fn lock(&self) -> MutexGuard<'_, TapHistory> {
        self.shared
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SampleTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let history = self.lock();
        f.debug_struct("SampleTap")
            .field("buffered", &history.ring.len())
            .field("capacity", &history.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Borrowed view of a live audio signal consumed by the [`SpectralAnalyzer`].
///
/// The device that fills the tap is owned by the lifecycle manager; this
/// handle is only valid between the analyzer's `start` and `stop`.
#[derive(Debug, Clone)]
pub struct AudioSignalHandle {
    tap: SampleTap,
    sample_rate: u32,
    kind: AudioSourceKind,
    label: String,
}

impl AudioSignalHandle {
    pub fn new(
        tap: SampleTap,
        sample_rate: u32,
        kind: AudioSourceKind,
        label: impl Into<String>,
    ) -> Self {
        Self {
            tap,
            sample_rate,
            kind,
            label: label.into(),
        }
    }

    pub fn tap(&self) -> &SampleTap {
        &self.tap
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn kind(&self) -> AudioSourceKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// An acquired audio stream: microphone capture or media playback.
pub trait AudioInput {
    fn signal(&self) -> AudioSignalHandle;

    /// Starts or resumes delivery of samples. Fails with
    /// [`MotionLabError::ResourceUnavailable`] when the host refuses, for
    /// example until the user interacts with the application.
    fn resume(&mut self) -> Result<()>;

    /// Stops the stream and releases the underlying device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}

/// Identifies one running analyzer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalyzerHandle {
    task: TaskId,
    session: u64,
}

impl AnalyzerHandle {
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn session(&self) -> u64 {
        self.session
    }
}

/// Converts a live signal into [`AudioFeatures`] snapshots once per display
/// refresh.
pub struct SpectralAnalyzer {
    config: AudioConfig,
    shared: Arc<Mutex<AnalyzerState>>,
    reader: SnapshotReader<AudioFeatures>,
    active: Option<AnalyzerHandle>,
    sessions: u64,
}

struct AnalyzerState {
    transform: Option<SpectralTransform>,
    writer: SnapshotWriter<AudioFeatures>,
    source: Option<AudioSignalHandle>,
    session: u64,
    sequence: u64,
    window: Vec<f32>,
    bins: Vec<u8>,
}

impl SpectralAnalyzer {
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;
        let (writer, reader) = snapshot_cell(AudioFeatures::silent());
        let state = AnalyzerState {
            transform: None,
            writer,
            source: None,
            session: 0,
            sequence: 0,
            window: vec![0.0; config.fft_size],
            bins: vec![0; config.bin_count()],
        };
        Ok(Self {
            config,
            shared: Arc::new(Mutex::new(state)),
            reader,
            active: None,
            sessions: 0,
        })
    }

    /// Reading end of the published features.
    pub fn features(&self) -> SnapshotReader<AudioFeatures> {
        self.reader.clone()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn handle(&self) -> Option<AnalyzerHandle> {
        self.active
    }

    /// Kind of the signal currently attached, if any.
    pub fn source_kind(&self) -> Option<AudioSourceKind> {
        self.lock().source.as_ref().map(AudioSignalHandle::kind)
    }

    /// Attaches the transform stage to `signal` and schedules the analysis
    /// loop. A running session is stopped first.
    pub fn start(
        &mut self,
        scheduler: &mut FrameScheduler,
        signal: AudioSignalHandle,
    ) -> Result<AnalyzerHandle> {
        if signal.sample_rate() == 0 || signal.tap().is_closed() {
            return Err(MotionLabError::ResourceUnavailable(format!(
                "audio signal `{}` is not delivering samples",
                signal.label()
            )));
        }

        self.stop(scheduler);
        self.sessions += 1;
        let session = self.sessions;

        {
            let mut state = self.lock();
            if state.transform.is_none() {
                state.transform = Some(SpectralTransform::new(&self.config)?);
            }
            if let Some(transform) = state.transform.as_mut() {
                transform.reset();
            }
            state.source = Some(signal.clone());
            state.session = session;
            state.sequence = 0;
        }

        let task = scheduler.schedule(Box::new(AnalyzerTask {
            shared: self.shared.clone(),
            signal,
            session,
        }));
        let handle = AnalyzerHandle { task, session };
        self.active = Some(handle);
        tracing::debug!(session, %task, "spectral analyzer started");
        Ok(handle)
    }

    /// Stops the loop and resets the published snapshot to silence. Calling
    /// it while idle does nothing.
    pub fn stop(&mut self, scheduler: &mut FrameScheduler) -> bool {
        let stopped = self.halt(scheduler);
        self.clear();
        stopped
    }

    /// Cancels the pending tick and disconnects the stage without touching
    /// the published snapshot.
    pub(crate) fn halt(&mut self, scheduler: &mut FrameScheduler) -> bool {
        let Some(handle) = self.active.take() else {
            return false;
        };
        scheduler.cancel(handle.task);
        {
            let mut state = self.lock();
            state.source = None;
            state.session = 0;
        }
        tracing::debug!(session = handle.session, "spectral analyzer stopped");
        true
    }

    /// Publishes the zero snapshot unless it is already current.
    pub(crate) fn clear(&self) {
        if self.reader.latest().is_silent() {
            return;
        }
        self.lock().writer.publish(AudioFeatures::silent());
    }

    // A tick that panicked mid-publish leaves the last complete snapshot.
    fn lock(&self) -> MutexGuard<'_, AnalyzerState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SpectralAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectralAnalyzer")
            .field("config", &self.config)
            .field("active", &self.active)
            .field("sessions", &self.sessions)
            .finish()
    }
}

struct AnalyzerTask {
    shared: Arc<Mutex<AnalyzerState>>,
    signal: AudioSignalHandle,
    session: u64,
}

impl FrameTask for AnalyzerTask {
    fn name(&self) -> &'static str {
        "spectral-analyzer"
    }

    fn tick(&mut self, _frame: &FrameInfo) -> TaskControl {
        let mut guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if state.session != self.session {
            return TaskControl::Finish;
        }

        self.signal.tap().copy_latest(&mut state.window);
        let Some(transform) = state.transform.as_mut() else {
            return TaskControl::Finish;
        };
        if let Err(err) = transform.byte_frequency_data(&state.window, &mut state.bins) {
            tracing::warn!(%err, "spectral transform failed, skipping tick");
            return TaskControl::Reschedule;
        }

        state.sequence += 1;
        state.writer.publish(AudioFeatures {
            loudness: crate::analysis::loudness(&state.bins),
            spectrum: state.bins.clone(),
            frame_sequence: state.sequence,
        });
        TaskControl::Reschedule
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::PI;
    use std::time::Duration;

    use super::*;

    const TICK: Duration = Duration::from_millis(16);

    fn signal(tap: &SampleTap) -> AudioSignalHandle {
        AudioSignalHandle::new(tap.clone(), 48_000, AudioSourceKind::Synthetic, "test")
    }

    fn tone(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * 1_000.0 * i as f32 / 48_000.0).sin())
            .collect()
    }

    #[test]
    fn tap_keeps_latest_window_zero_padded() {
        let (mut writer, tap) = sample_tap(4);
        writer.push(&[1.0, 2.0]);
        let mut out = [9.0; 3];
        tap.copy_latest(&mut out);
        assert_eq!(out, [0.0, 1.0, 2.0]);

        writer.push(&[3.0, 4.0, 5.0]);
        let mut out = [0.0; 4];
        tap.copy_latest(&mut out);
        assert_eq!(out, [2.0, 3.0, 4.0, 5.0]);
        assert_eq!(tap.frames_written(), 5);
    }

    #[test]
    fn tap_downmixes_interleaved_frames() {
        let (mut writer, tap) = sample_tap(4);
        writer.push_interleaved(&[1.0, 0.0, 0.5, 0.5], 2);
        let mut out = [0.0; 2];
        tap.copy_latest(&mut out);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn tap_converts_integer_frames() {
        let (mut writer, tap) = sample_tap(4);
        writer.push_frames(&[i16::MAX, i16::MAX, 0, 0], 2, |s| f32::from(s) / f32::from(i16::MAX));
        let mut out = [9.0; 2];
        tap.copy_latest(&mut out);
        assert_eq!(out, [1.0, 0.0]);
    }

    #[test]
    fn full_writer_drops_until_drained() {
        let (mut writer, tap) = sample_tap(2);
        writer.push(&[1.0, 2.0, 3.0]);
        assert_eq!(tap.frames_written(), 2);
        assert_eq!(tap.drain(), 2);

        writer.push(&[4.0]);
        let mut out = [0.0; 2];
        tap.copy_latest(&mut out);
        assert_eq!(out, [2.0, 4.0]);
    }

    #[test]
    fn closed_tap_ignores_writes() {
        let (mut writer, tap) = sample_tap(4);
        writer.push(&[1.0]);
        tap.close();
        writer.push(&[2.0]);

        assert!(writer.is_closed());
        let mut out = [9.0; 2];
        tap.copy_latest(&mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(tap.frames_written(), 1);
    }

    #[test]
    fn poisoned_analyzer_keeps_publishing() {
        let mut scheduler = FrameScheduler::new();
        let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
        let (_writer, tap) = sample_tap(1024);
        let features = analyzer.features();
        analyzer.start(&mut scheduler, signal(&tap)).unwrap();

        let shared = analyzer.shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("poison the analysis state");
        })
        .join();
        assert!(analyzer.shared.is_poisoned());

        scheduler.run_frame(TICK);
        assert_eq!(features.latest().frame_sequence, 1);
        assert_eq!(analyzer.source_kind(), Some(AudioSourceKind::Synthetic));
        assert!(analyzer.stop(&mut scheduler));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn publishes_features_each_frame() {
        let mut scheduler = FrameScheduler::new();
        let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
        let (mut writer, tap) = sample_tap(1024);
        let features = analyzer.features();

        analyzer.start(&mut scheduler, signal(&tap)).unwrap();
        scheduler.run_frame(TICK);
        let quiet = features.latest();
        assert_eq!(quiet.loudness, 0.0);
        assert_eq!(quiet.spectrum.len(), 512);
        assert_eq!(quiet.frame_sequence, 1);

        writer.push(&tone(1024));
        scheduler.run_frame(TICK);
        let loud = features.latest();
        assert!(loud.loudness > 0.0);
        assert!(loud.loudness <= 1.0);
        assert_eq!(loud.spectrum.len(), 512);
        assert_eq!(loud.frame_sequence, 2);
    }

    #[test]
    fn stop_resets_snapshot_and_is_idempotent() {
        let mut scheduler = FrameScheduler::new();
        let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
        let (mut writer, tap) = sample_tap(1024);
        writer.push(&tone(1024));
        let features = analyzer.features();

        analyzer.start(&mut scheduler, signal(&tap)).unwrap();
        scheduler.run_frame(TICK);
        assert!(features.latest().loudness > 0.0);

        assert!(analyzer.stop(&mut scheduler));
        assert!(features.latest().is_silent());
        assert!(!analyzer.stop(&mut scheduler));

        scheduler.run_frame(TICK);
        assert!(features.latest().is_silent());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn restarting_replaces_the_previous_loop() {
        let mut scheduler = FrameScheduler::new();
        let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
        let first = analyzer.start(&mut scheduler, signal(&sample_tap(8).1)).unwrap();
        let second = analyzer.start(&mut scheduler, signal(&sample_tap(8).1)).unwrap();

        assert_ne!(first.session(), second.session());
        assert!(!scheduler.is_scheduled(first.task()));
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn refuses_closed_signals() {
        let mut scheduler = FrameScheduler::new();
        let mut analyzer = SpectralAnalyzer::new(AudioConfig::default()).unwrap();
        let (_writer, tap) = sample_tap(8);
        tap.close();

        let err = analyzer.start(&mut scheduler, signal(&tap)).unwrap_err();
        assert!(matches!(err, MotionLabError::ResourceUnavailable(_)));
        assert!(!analyzer.is_running());
    }
}
