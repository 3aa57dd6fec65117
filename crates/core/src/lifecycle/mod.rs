//! Ownership of capture devices and the state machine governing them.
//!
//! Each device kind moves through `Idle -> Acquiring -> Active -> Releasing ->
//! Idle`. A refused request lands in `Denied`, any other failure in `Error`;
//! both accept a fresh `start`. Starting an active kind performs a full stop
//! first, so two live handles of one kind never coexist.

use std::collections::VecDeque;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audio::{AnalyzerHandle, AudioInput, AudioSourceKind, SpectralAnalyzer};
use crate::media::{MediaElement, MediaLedger};
use crate::pose::{ExtractorHandle, PoseExtractor, PoseFrame};
use crate::snapshot::SnapshotReader;
use crate::timeline::FrameScheduler;
use crate::video::{CameraStream, Resolution};
use crate::{AudioFeatures, CameraConfig, MotionLabError, Result};

const HISTORY_LIMIT: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Camera,
    Microphone,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Camera, DeviceKind::Microphone];
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Camera => f.write_str("Camera"),
            DeviceKind::Microphone => f.write_str("Microphone"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Acquiring,
    Active,
    Releasing,
    /// The user or OS refused access. Left only by an explicit start.
    Denied,
    /// Acquisition failed for another reason. Left only by an explicit start.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusTone {
    Neutral,
    Warning,
    Success,
}

/// User-facing description of the pipeline state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBadge {
    pub label: String,
    pub tone: StatusTone,
}

impl StatusBadge {
    pub fn neutral(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tone: StatusTone::Neutral,
        }
    }

    pub fn warning(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tone: StatusTone::Warning,
        }
    }

    pub fn success(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            tone: StatusTone::Success,
        }
    }

    pub fn waiting() -> Self {
        Self::neutral("Waiting for input")
    }
}

impl fmt::Display for StatusBadge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: DeviceKind,
    pub from: SessionState,
    pub to: SessionState,
}

/// Acquires physical devices. Only the [`LifecycleManager`] calls it.
pub trait DeviceBackend {
    /// Requests the microphone. Denials must be reported as
    /// [`MotionLabError::PermissionDenied`].
    fn open_microphone(&mut self) -> Result<Box<dyn AudioInput>>;

    /// Requests a camera at `requested`; the stream reports what was granted.
    fn open_camera(&mut self, requested: Resolution) -> Result<Box<dyn CameraStream>>;

    /// Prepares playback of decoded media. The stream starts paused.
    fn open_playback(&mut self, media: &MediaElement) -> Result<Box<dyn AudioInput>>;
}

/// Live device handle held by a [`CaptureSession`].
pub enum DeviceHandle {
    Microphone(Box<dyn AudioInput>),
    Camera(Box<dyn CameraStream>),
}

impl DeviceHandle {
    fn close(&mut self) {
        match self {
            DeviceHandle::Microphone(input) => input.close(),
            DeviceHandle::Camera(stream) => stream.close(),
        }
    }
}

impl fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceHandle::Microphone(input) => f
                .debug_tuple("Microphone")
                .field(&input.is_closed())
                .finish(),
            DeviceHandle::Camera(stream) => {
                f.debug_tuple("Camera").field(&stream.is_closed()).finish()
            }
        }
    }
}

/// Processing loop bound to a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingContext {
    Analyzer(AnalyzerHandle),
    Extractor(ExtractorHandle),
}

/// Live binding between a physical device and its processing loop.
#[derive(Debug)]
pub struct CaptureSession {
    kind: DeviceKind,
    device: DeviceHandle,
    context: Option<ProcessingContext>,
    is_active: bool,
}

impl CaptureSession {
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn context(&self) -> Option<ProcessingContext> {
        self.context
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

#[derive(Debug)]
struct DeviceSlot {
    state: SessionState,
    session: Option<CaptureSession>,
}

impl DeviceSlot {
    fn new() -> Self {
        Self {
            state: SessionState::Idle,
            session: None,
        }
    }
}

/// One slot per device kind. A slot holds at most one session.
#[derive(Debug)]
pub struct ResourceTable {
    camera: DeviceSlot,
    microphone: DeviceSlot,
    history: VecDeque<Transition>,
}

impl ResourceTable {
    fn new() -> Self {
        Self {
            camera: DeviceSlot::new(),
            microphone: DeviceSlot::new(),
            history: VecDeque::with_capacity(HISTORY_LIMIT),
        }
    }

    fn slot(&self, kind: DeviceKind) -> &DeviceSlot {
        match kind {
            DeviceKind::Camera => &self.camera,
            DeviceKind::Microphone => &self.microphone,
        }
    }

    fn slot_mut(&mut self, kind: DeviceKind) -> &mut DeviceSlot {
        match kind {
            DeviceKind::Camera => &mut self.camera,
            DeviceKind::Microphone => &mut self.microphone,
        }
    }

    pub fn state(&self, kind: DeviceKind) -> SessionState {
        self.slot(kind).state
    }

    pub fn session(&self, kind: DeviceKind) -> Option<&CaptureSession> {
        self.slot(kind).session.as_ref()
    }

    /// Most recent transitions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &Transition> {
        self.history.iter()
    }

    fn transition(&mut self, kind: DeviceKind, to: SessionState) {
        let slot = self.slot_mut(kind);
        let from = slot.state;
        slot.state = to;
        tracing::debug!(kind = ?kind, from = ?from, to = ?to, "device transition");
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(Transition { kind, from, to });
    }
}

struct MediaSlot {
    element: MediaElement,
    playback: Option<Box<dyn AudioInput>>,
    playing: bool,
}

/// Owns every device handle and processing loop and enforces the device
/// state machine.
pub struct LifecycleManager {
    backend: Box<dyn DeviceBackend>,
    table: ResourceTable,
    analyzer: SpectralAnalyzer,
    extractor: PoseExtractor,
    camera: CameraConfig,
    media: Option<MediaSlot>,
    ledger: MediaLedger,
    status: StatusBadge,
}

impl LifecycleManager {
    pub fn new(
        backend: Box<dyn DeviceBackend>,
        analyzer: SpectralAnalyzer,
        extractor: PoseExtractor,
        camera: CameraConfig,
    ) -> Self {
        Self {
            backend,
            table: ResourceTable::new(),
            analyzer,
            extractor,
            camera,
            media: None,
            ledger: MediaLedger::new(),
            status: StatusBadge::waiting(),
        }
    }

    pub fn state(&self, kind: DeviceKind) -> SessionState {
        self.table.state(kind)
    }

    pub fn is_active(&self, kind: DeviceKind) -> bool {
        self.state(kind) == SessionState::Active
    }

    pub fn table(&self) -> &ResourceTable {
        &self.table
    }

    pub fn status(&self) -> &StatusBadge {
        &self.status
    }

    pub fn camera_caption(&self) -> &'static str {
        if self.is_active(DeviceKind::Camera) {
            "Tracking body motion"
        } else {
            "Camera idle"
        }
    }

    pub fn features(&self) -> SnapshotReader<AudioFeatures> {
        self.analyzer.features()
    }

    pub fn poses(&self) -> SnapshotReader<PoseFrame> {
        self.extractor.frames()
    }

    pub fn analyzer(&self) -> &SpectralAnalyzer {
        &self.analyzer
    }

    pub fn extractor(&self) -> &PoseExtractor {
        &self.extractor
    }

    pub fn ledger(&self) -> &MediaLedger {
        &self.ledger
    }

    pub fn media_name(&self) -> Option<&str> {
        self.media.as_ref().map(|slot| slot.element.name())
    }

    /// Starts `kind`, stopping a live session of the same kind first.
    pub fn start(&mut self, kind: DeviceKind, scheduler: &mut FrameScheduler) -> &StatusBadge {
        if self.is_active(kind) {
            tracing::info!(kind = ?kind, "restarting active device");
            self.release(kind, scheduler);
        }

        self.table.transition(kind, SessionState::Acquiring);
        let acquired = match kind {
            DeviceKind::Microphone => self.acquire_microphone(scheduler),
            DeviceKind::Camera => self.acquire_camera(scheduler),
        };

        match acquired {
            Ok(session) => {
                self.table.slot_mut(kind).session = Some(session);
                self.table.transition(kind, SessionState::Active);
                self.status = StatusBadge::success(format!("{kind} streaming"));
            }
            Err(err) => {
                tracing::warn!(kind = ?kind, %err, "device start failed");
                if err.is_denial() {
                    self.table.transition(kind, SessionState::Denied);
                    self.status = StatusBadge::warning(format!("{kind} access denied"));
                } else {
                    self.table.transition(kind, SessionState::Error);
                    self.status = StatusBadge::warning(match err {
                        MotionLabError::ModelLoad(_) => "Pose model unavailable".to_string(),
                        _ => format!("{kind} unavailable"),
                    });
                }
                // A playback analysis that was never interrupted keeps running.
                if kind == DeviceKind::Microphone && self.analyzer.source_kind().is_none() {
                    self.attach_media_analyzer(scheduler);
                }
            }
        }
        &self.status
    }

    /// Stops `kind` if it is active. Otherwise does nothing.
    pub fn stop(&mut self, kind: DeviceKind, scheduler: &mut FrameScheduler) -> &StatusBadge {
        if self.release(kind, scheduler) {
            self.status = StatusBadge::neutral(format!("{kind} stopped"));
            if kind == DeviceKind::Microphone {
                self.attach_media_analyzer(scheduler);
            }
        }
        &self.status
    }

    pub fn toggle(&mut self, kind: DeviceKind, scheduler: &mut FrameScheduler) -> &StatusBadge {
        if self.is_active(kind) {
            self.stop(kind, scheduler)
        } else {
            self.start(kind, scheduler)
        }
    }

    /// Decodes `path` and loads it. A file that fails to decode leaves the
    /// current media in place.
    pub fn load_media_file(&mut self, path: &Path, scheduler: &mut FrameScheduler) -> &StatusBadge {
        match MediaElement::open(path, &self.ledger) {
            Ok(element) => self.load_media(element, scheduler),
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "unable to load audio");
                self.status = StatusBadge::warning("Unable to decode audio");
                &self.status
            }
        }
    }

    /// Replaces the loaded media, releasing the previous element exactly
    /// once, and attempts to start playback.
    pub fn load_media(
        &mut self,
        element: MediaElement,
        scheduler: &mut FrameScheduler,
    ) -> &StatusBadge {
        self.unload_media(scheduler);

        let name = element.name().to_string();
        let playback = match self.backend.open_playback(&element) {
            Ok(playback) => Some(playback),
            Err(err) => {
                tracing::warn!(%err, media = %name, "playback unavailable");
                None
            }
        };
        self.media = Some(MediaSlot {
            element,
            playback,
            playing: false,
        });

        let has_output = self.media.as_ref().is_some_and(|slot| slot.playback.is_some());
        self.status = if !has_output {
            StatusBadge::warning("Audio output unavailable")
        } else if self.resume_media() {
            StatusBadge::success(format!("Loaded audio • {name}"))
        } else {
            StatusBadge::warning("Audio ready - press play")
        };
        self.attach_media_analyzer(scheduler);
        &self.status
    }

    /// Explicit user request to start playback of the loaded media.
    pub fn play_media(&mut self, scheduler: &mut FrameScheduler) -> &StatusBadge {
        let Some(name) = self.media_name().map(str::to_string) else {
            return &self.status;
        };
        self.status = if self.resume_media() {
            StatusBadge::success(format!("Playing audio • {name}"))
        } else {
            StatusBadge::warning("Audio ready - press play")
        };
        if self.analyzer.source_kind().is_none() {
            self.attach_media_analyzer(scheduler);
        }
        &self.status
    }

    /// Forces every device to release, regardless of UI state, and frees the
    /// cached pose model. Safe to call more than once.
    pub fn shutdown(&mut self, scheduler: &mut FrameScheduler) {
        for kind in DeviceKind::ALL {
            self.release(kind, scheduler);
        }
        self.unload_media(scheduler);
        self.analyzer.stop(scheduler);
        self.extractor.shutdown(scheduler);
        self.ledger.report_leaks();
        self.status = StatusBadge::waiting();
    }

    fn acquire_microphone(&mut self, scheduler: &mut FrameScheduler) -> Result<CaptureSession> {
        let mut input = self.backend.open_microphone()?;
        if let Err(err) = input.resume() {
            input.close();
            return Err(err);
        }
        let handle = match self.analyzer.start(scheduler, input.signal()) {
            Ok(handle) => handle,
            Err(err) => {
                input.close();
                return Err(err);
            }
        };
        Ok(CaptureSession {
            kind: DeviceKind::Microphone,
            device: DeviceHandle::Microphone(input),
            context: Some(ProcessingContext::Analyzer(handle)),
            is_active: true,
        })
    }

    fn acquire_camera(&mut self, scheduler: &mut FrameScheduler) -> Result<CaptureSession> {
        let requested = Resolution::new(self.camera.width, self.camera.height);
        let mut stream = self.backend.open_camera(requested)?;
        let source = stream.source();
        if source.resolution() != requested {
            tracing::info!(
                %requested,
                granted = %source.resolution(),
                "camera granted a different resolution"
            );
        }
        let handle = match self.extractor.start(scheduler, source) {
            Ok(handle) => handle,
            Err(err) => {
                stream.close();
                return Err(err);
            }
        };
        Ok(CaptureSession {
            kind: DeviceKind::Camera,
            device: DeviceHandle::Camera(stream),
            context: Some(ProcessingContext::Extractor(handle)),
            is_active: true,
        })
    }

    /// Active -> Releasing -> Idle. The processing loop stops before the
    /// device is closed; the snapshot is cleared last.
    fn release(&mut self, kind: DeviceKind, scheduler: &mut FrameScheduler) -> bool {
        if self.state(kind) != SessionState::Active {
            return false;
        }
        self.table.transition(kind, SessionState::Releasing);

        match kind {
            DeviceKind::Microphone => {
                self.analyzer.halt(scheduler);
            }
            DeviceKind::Camera => {
                self.extractor.halt(scheduler);
            }
        }
        if let Some(mut session) = self.table.slot_mut(kind).session.take() {
            session.is_active = false;
            session.device.close();
        }
        match kind {
            DeviceKind::Microphone => self.analyzer.clear(),
            DeviceKind::Camera => self.extractor.clear(),
        }

        self.table.transition(kind, SessionState::Idle);
        true
    }

    fn resume_media(&mut self) -> bool {
        let Some(slot) = self.media.as_mut() else {
            return false;
        };
        let Some(playback) = slot.playback.as_mut() else {
            return false;
        };
        match playback.resume() {
            Ok(()) => {
                slot.playing = true;
                true
            }
            Err(err) => {
                tracing::warn!(%err, media = slot.element.name(), "playback awaiting user action");
                false
            }
        }
    }

    fn attach_media_analyzer(&mut self, scheduler: &mut FrameScheduler) {
        if self.is_active(DeviceKind::Microphone) {
            return;
        }
        let Some(signal) = self
            .media
            .as_ref()
            .and_then(|slot| slot.playback.as_ref())
            .map(|playback| playback.signal())
        else {
            return;
        };
        if let Err(err) = self.analyzer.start(scheduler, signal) {
            tracing::warn!(%err, "unable to analyse media playback");
        }
    }

    fn unload_media(&mut self, scheduler: &mut FrameScheduler) {
        let Some(mut slot) = self.media.take() else {
            return;
        };
        if self.analyzer.source_kind() == Some(AudioSourceKind::Media) {
            self.analyzer.stop(scheduler);
        }
        if let Some(playback) = slot.playback.as_mut() {
            playback.close();
        }
        tracing::debug!(media = slot.element.name(), played = slot.playing, "unloading media");
    }
}

impl Drop for LifecycleManager {
    fn drop(&mut self) {
        for kind in DeviceKind::ALL {
            if let Some(mut session) = self.table.slot_mut(kind).session.take() {
                tracing::warn!(kind = ?kind, "closing device left open at teardown");
                session.device.close();
            }
        }
        if let Some(playback) = self.media.as_mut().and_then(|slot| slot.playback.as_mut()) {
            playback.close();
        }
    }
}

impl fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("table", &self.table)
            .field("analyzer", &self.analyzer)
            .field("extractor", &self.extractor)
            .field("media", &self.media_name())
            .field("status", &self.status)
            .finish()
    }
}
