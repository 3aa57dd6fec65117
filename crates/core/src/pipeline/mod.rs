//! One live session: the frame scheduler, the lifecycle manager and the
//! render synchronizer wired together behind the user-facing actions.

use std::path::Path;
use std::time::Duration;

use crate::lifecycle::{DeviceBackend, DeviceKind, LifecycleManager, SessionState, StatusBadge};
use crate::media::{MediaElement, MediaLedger};
use crate::pose::{DetectorFactory, PoseExtractor, PoseFrame};
use crate::render::{RenderSink, RenderSynchronizer};
use crate::snapshot::SnapshotReader;
use crate::timeline::{FrameInfo, FrameScheduler, TaskId, TaskPhase};
use crate::{AppConfig, AudioFeatures, Result, SpectralAnalyzer};

pub struct Pipeline {
    scheduler: FrameScheduler,
    manager: LifecycleManager,
    render_task: Option<TaskId>,
    refresh: Duration,
}

impl Pipeline {
    pub fn new(
        config: AppConfig,
        backend: Box<dyn DeviceBackend>,
        detector: Box<dyn DetectorFactory>,
        sink: Box<dyn RenderSink>,
    ) -> Result<Self> {
        config.validate()?;
        let analyzer = SpectralAnalyzer::new(config.audio.clone())?;
        let extractor = PoseExtractor::new(config.pose.clone(), detector);
        let manager = LifecycleManager::new(backend, analyzer, extractor, config.camera.clone());

        let mut scheduler = FrameScheduler::new();
        let synchronizer = RenderSynchronizer::new(manager.features(), manager.poses(), sink);
        let render_task = scheduler.schedule_in(TaskPhase::Present, Box::new(synchronizer));
        tracing::info!(refresh_hz = config.display.refresh_hz, "pipeline ready");

        Ok(Self {
            scheduler,
            manager,
            render_task: Some(render_task),
            refresh: Duration::from_secs_f64(1.0 / f64::from(config.display.refresh_hz.max(1))),
        })
    }

    /// Nominal interval between display refreshes.
    pub fn refresh_interval(&self) -> Duration {
        self.refresh
    }

    /// Runs one display refresh: every producer ticks once, then the render
    /// loop, in scheduling order.
    pub fn run_frame(&mut self, delta: Duration) -> FrameInfo {
        self.scheduler.run_frame(delta)
    }

    pub fn start(&mut self, kind: DeviceKind) -> StatusBadge {
        self.manager.start(kind, &mut self.scheduler).clone()
    }

    pub fn stop(&mut self, kind: DeviceKind) -> StatusBadge {
        self.manager.stop(kind, &mut self.scheduler).clone()
    }

    pub fn toggle_microphone(&mut self) -> StatusBadge {
        self.manager
            .toggle(DeviceKind::Microphone, &mut self.scheduler)
            .clone()
    }

    pub fn toggle_camera(&mut self) -> StatusBadge {
        self.manager.toggle(DeviceKind::Camera, &mut self.scheduler).clone()
    }

    pub fn load_audio_file(&mut self, path: &Path) -> StatusBadge {
        self.manager.load_media_file(path, &mut self.scheduler).clone()
    }

    pub fn load_media(&mut self, element: MediaElement) -> StatusBadge {
        self.manager.load_media(element, &mut self.scheduler).clone()
    }

    pub fn play_audio(&mut self) -> StatusBadge {
        self.manager.play_media(&mut self.scheduler).clone()
    }

    pub fn status(&self) -> &StatusBadge {
        self.manager.status()
    }

    pub fn camera_caption(&self) -> &'static str {
        self.manager.camera_caption()
    }

    pub fn state(&self, kind: DeviceKind) -> SessionState {
        self.manager.state(kind)
    }

    pub fn features(&self) -> SnapshotReader<AudioFeatures> {
        self.manager.features()
    }

    pub fn poses(&self) -> SnapshotReader<PoseFrame> {
        self.manager.poses()
    }

    /// Ledger media elements must be registered with to be loaded here.
    pub fn ledger(&self) -> &MediaLedger {
        self.manager.ledger()
    }

    pub fn manager(&self) -> &LifecycleManager {
        &self.manager
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Releases every device, the loaded media and the pose model, and stops
    /// the render loop. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(task) = self.render_task.take() else {
            return;
        };
        self.manager.shutdown(&mut self.scheduler);
        self.scheduler.cancel(task);
        tracing::info!(frames = self.scheduler.clock().frames, "pipeline shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.render_task.is_none()
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("scheduler", &self.scheduler)
            .field("manager", &self.manager)
            .field("render_task", &self.render_task)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{MannequinDetector, SyntheticBackend};
    use crate::lifecycle::StatusTone;

    const TICK: Duration = Duration::from_millis(16);

    fn pipeline() -> Pipeline {
        Pipeline::new(
            AppConfig::live_defaults(),
            Box::new(SyntheticBackend::default()),
            Box::new(MannequinDetector::load),
            Box::new(|_: &crate::render::RenderState| {}),
        )
        .unwrap()
    }

    #[test]
    fn toggles_flip_device_state() {
        let mut pipeline = pipeline();
        assert_eq!(pipeline.status().label, "Waiting for input");

        let status = pipeline.toggle_camera();
        assert_eq!(status.tone, StatusTone::Success);
        assert_eq!(pipeline.camera_caption(), "Tracking body motion");

        let status = pipeline.toggle_camera();
        assert_eq!(status.label, "Camera stopped");
        assert_eq!(pipeline.state(DeviceKind::Camera), SessionState::Idle);
        assert_eq!(pipeline.camera_caption(), "Camera idle");
    }

    #[test]
    fn shutdown_stops_all_tasks() {
        let mut pipeline = pipeline();
        pipeline.toggle_microphone();
        pipeline.toggle_camera();
        pipeline.run_frame(TICK);
        assert_eq!(pipeline.scheduler().pending(), 3);

        pipeline.shutdown();
        pipeline.shutdown();
        assert!(pipeline.is_shut_down());
        assert_eq!(pipeline.scheduler().pending(), 0);
        assert_eq!(pipeline.state(DeviceKind::Microphone), SessionState::Idle);
        assert_eq!(pipeline.state(DeviceKind::Camera), SessionState::Idle);
        assert!(!pipeline.manager().extractor().model_cache().is_loaded());
    }

    #[test]
    fn undecodable_file_is_a_warning() {
        let mut pipeline = pipeline();
        let status = pipeline.load_audio_file(Path::new("/nonexistent/track.mp3"));
        assert_eq!(status.tone, StatusTone::Warning);
        assert_eq!(pipeline.manager().media_name(), None);
    }
}
