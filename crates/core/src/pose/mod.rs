//! Body landmark extraction from live video.

#[cfg(feature = "movenet")]
pub mod movenet;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::snapshot::{snapshot_cell, SnapshotReader, SnapshotWriter};
use crate::timeline::{FrameInfo, FrameScheduler, FrameTask, TaskControl, TaskId};
use crate::video::{VideoFrame, VideoSource};
use crate::{MotionLabError, PoseConfig, Result};

/// Body keypoint slots in landmark order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Keypoint {
    Nose,
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    LeftShoulder,
    RightShoulder,
    LeftElbow,
    RightElbow,
    LeftWrist,
    RightWrist,
    LeftHip,
    RightHip,
    LeftKnee,
    RightKnee,
    LeftAnkle,
    RightAnkle,
}

/// Number of slots in a populated landmark set.
pub const LANDMARK_COUNT: usize = 17;

impl Keypoint {
    pub const ALL: [Keypoint; LANDMARK_COUNT] = [
        Keypoint::Nose,
        Keypoint::LeftEye,
        Keypoint::RightEye,
        Keypoint::LeftEar,
        Keypoint::RightEar,
        Keypoint::LeftShoulder,
        Keypoint::RightShoulder,
        Keypoint::LeftElbow,
        Keypoint::RightElbow,
        Keypoint::LeftWrist,
        Keypoint::RightWrist,
        Keypoint::LeftHip,
        Keypoint::RightHip,
        Keypoint::LeftKnee,
        Keypoint::RightKnee,
        Keypoint::LeftAnkle,
        Keypoint::RightAnkle,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Keypoint::Nose => "nose",
            Keypoint::LeftEye => "left_eye",
            Keypoint::RightEye => "right_eye",
            Keypoint::LeftEar => "left_ear",
            Keypoint::RightEar => "right_ear",
            Keypoint::LeftShoulder => "left_shoulder",
            Keypoint::RightShoulder => "right_shoulder",
            Keypoint::LeftElbow => "left_elbow",
            Keypoint::RightElbow => "right_elbow",
            Keypoint::LeftWrist => "left_wrist",
            Keypoint::RightWrist => "right_wrist",
            Keypoint::LeftHip => "left_hip",
            Keypoint::RightHip => "right_hip",
            Keypoint::LeftKnee => "left_knee",
            Keypoint::RightKnee => "right_knee",
            Keypoint::LeftAnkle => "left_ankle",
            Keypoint::RightAnkle => "right_ankle",
        }
    }
}

/// Pairs of keypoints joined by a bone when drawing the skeleton.
pub const SKELETON_EDGES: [(Keypoint, Keypoint); 18] = [
    (Keypoint::Nose, Keypoint::LeftEye),
    (Keypoint::LeftEye, Keypoint::LeftEar),
    (Keypoint::Nose, Keypoint::RightEye),
    (Keypoint::RightEye, Keypoint::RightEar),
    (Keypoint::Nose, Keypoint::LeftShoulder),
    (Keypoint::Nose, Keypoint::RightShoulder),
    (Keypoint::LeftShoulder, Keypoint::LeftElbow),
    (Keypoint::LeftElbow, Keypoint::LeftWrist),
    (Keypoint::RightShoulder, Keypoint::RightElbow),
    (Keypoint::RightElbow, Keypoint::RightWrist),
    (Keypoint::LeftShoulder, Keypoint::RightShoulder),
    (Keypoint::LeftShoulder, Keypoint::LeftHip),
    (Keypoint::RightShoulder, Keypoint::RightHip),
    (Keypoint::LeftHip, Keypoint::RightHip),
    (Keypoint::LeftHip, Keypoint::LeftKnee),
    (Keypoint::LeftKnee, Keypoint::LeftAnkle),
    (Keypoint::RightHip, Keypoint::RightKnee),
    (Keypoint::RightKnee, Keypoint::RightAnkle),
];

/// A keypoint position in source pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    /// Detection confidence in [0, 1]. Missing means zero.
    pub confidence: Option<f32>,
}

impl Landmark {
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            confidence: Some(confidence),
        }
    }

    /// Placeholder for a slot the detector did not report.
    pub fn missing() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn score(&self) -> f32 {
        self.confidence.unwrap_or(0.0)
    }

    pub fn is_reliable(&self, threshold: f32) -> bool {
        self.score() >= threshold
    }
}

/// Landmarks of the tracked subject plus the native size of the frame they
/// were measured in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseFrame {
    /// Either empty (no subject) or exactly [`LANDMARK_COUNT`] entries.
    pub landmarks: Vec<Landmark>,
    pub source_width: f32,
    pub source_height: f32,
}

impl PoseFrame {
    /// Published whenever no frame source is present.
    pub fn empty() -> Self {
        Self {
            landmarks: Vec::new(),
            source_width: 1.0,
            source_height: 1.0,
        }
    }

    /// Frame with no subject detected in a `width` x `height` source.
    pub fn no_subject(width: f32, height: f32) -> Self {
        Self {
            landmarks: Vec::new(),
            source_width: width.max(1.0),
            source_height: height.max(1.0),
        }
    }

    pub fn has_subject(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn landmark(&self, keypoint: Keypoint) -> Option<&Landmark> {
        self.landmarks.get(keypoint.index())
    }
}

impl Default for PoseFrame {
    fn default() -> Self {
        Self::empty()
    }
}

/// One person reported by the detector.
#[derive(Debug, Clone, PartialEq)]
pub struct Subject {
    pub keypoints: Vec<Landmark>,
    pub score: Option<f32>,
}

impl Subject {
    /// Overall confidence, falling back to the mean keypoint confidence.
    pub fn confidence(&self) -> f32 {
        self.score.unwrap_or_else(|| {
            if self.keypoints.is_empty() {
                0.0
            } else {
                let total: f32 = self.keypoints.iter().map(Landmark::score).sum();
                total / self.keypoints.len() as f32
            }
        })
    }

    /// Landmarks in fixed slot order, padding unreported slots with
    /// zero-confidence entries.
    pub fn into_landmarks(self) -> Vec<Landmark> {
        let mut landmarks = self.keypoints;
        landmarks.truncate(LANDMARK_COUNT);
        landmarks.resize(LANDMARK_COUNT, Landmark::missing());
        landmarks
    }
}

/// Options passed with every estimate request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimateOptions {
    pub max_subjects: usize,
    /// Flip x so that the subject's right hand appears on the right.
    pub mirror: bool,
}

impl From<&PoseConfig> for EstimateOptions {
    fn from(config: &PoseConfig) -> Self {
        Self {
            max_subjects: config.max_subjects,
            mirror: config.mirror,
        }
    }
}

/// External pose-estimation capability.
pub trait PoseDetector: Send {
    /// Estimates up to `options.max_subjects` subjects in `frame`. Landmark
    /// coordinates are in the frame's pixel space.
    fn estimate(&mut self, frame: &VideoFrame, options: &EstimateOptions) -> Result<Vec<Subject>>;

    /// Drops per-session state. The loaded model itself stays resident.
    fn reset(&mut self) {}
}

/// Builds a detector. Construction is expensive and happens at most once per
/// successful load.
pub trait DetectorFactory {
    fn create(&self, config: &PoseConfig) -> Result<Box<dyn PoseDetector>>;
}

impl<F> DetectorFactory for F
where
    F: Fn(&PoseConfig) -> Result<Box<dyn PoseDetector>>,
{
    fn create(&self, config: &PoseConfig) -> Result<Box<dyn PoseDetector>> {
        self(config)
    }
}

/// Factory used when no model has been configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoModel;

impl DetectorFactory for NoModel {
    fn create(&self, _config: &PoseConfig) -> Result<Box<dyn PoseDetector>> {
        Err(MotionLabError::ModelLoad("no pose model configured".into()))
    }
}

type SharedDetector = Arc<Mutex<Box<dyn PoseDetector>>>;

/// Keeps the loaded detector alive across camera sessions until
/// [`release`](ModelCache::release) is called at teardown.
pub struct ModelCache {
    factory: Box<dyn DetectorFactory>,
    detector: Option<SharedDetector>,
    loads: u32,
    failures: u32,
}

impl ModelCache {
    pub fn new(factory: Box<dyn DetectorFactory>) -> Self {
        Self {
            factory,
            detector: None,
            loads: 0,
            failures: 0,
        }
    }

    /// Returns the cached detector, constructing it on first use. A failed
    /// load is not retried until the next call.
    fn get_or_load(&mut self, config: &PoseConfig) -> Result<SharedDetector> {
        if let Some(detector) = &self.detector {
            return Ok(detector.clone());
        }
        match self.factory.create(config) {
            Ok(detector) => {
                self.loads += 1;
                tracing::info!(loads = self.loads, "pose model loaded");
                let detector = Arc::new(Mutex::new(detector));
                self.detector = Some(detector.clone());
                Ok(detector)
            }
            Err(err) => {
                self.failures += 1;
                tracing::warn!(%err, failures = self.failures, "pose model failed to load");
                Err(match err {
                    MotionLabError::ModelLoad(_) => err,
                    other => MotionLabError::ModelLoad(other.to_string()),
                })
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.detector.is_some()
    }

    /// Successful model constructions so far.
    pub fn loads(&self) -> u32 {
        self.loads
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Frees the model. Called once on final teardown.
    pub fn release(&mut self) {
        if self.detector.take().is_some() {
            tracing::info!("pose model released");
        }
    }
}

impl std::fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelCache")
            .field("loaded", &self.is_loaded())
            .field("loads", &self.loads)
            .field("failures", &self.failures)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractorHandle {
    task: TaskId,
    session: u64,
}

impl ExtractorHandle {
    pub fn task(&self) -> TaskId {
        self.task
    }

    pub fn session(&self) -> u64 {
        self.session
    }
}

/// Repeatedly submits the current camera frame to the detector and publishes
/// the most confident subject.
pub struct PoseExtractor {
    config: PoseConfig,
    cache: ModelCache,
    writer: Arc<SnapshotWriter<PoseFrame>>,
    reader: SnapshotReader<PoseFrame>,
    active: Option<(ExtractorHandle, SharedDetector)>,
    sessions: u64,
}

impl PoseExtractor {
    pub fn new(config: PoseConfig, factory: Box<dyn DetectorFactory>) -> Self {
        let (writer, reader) = snapshot_cell(PoseFrame::empty());
        Self {
            config,
            cache: ModelCache::new(factory),
            writer: Arc::new(writer),
            reader,
            active: None,
            sessions: 0,
        }
    }

    pub fn frames(&self) -> SnapshotReader<PoseFrame> {
        self.reader.clone()
    }

    pub fn config(&self) -> &PoseConfig {
        &self.config
    }

    pub fn model_cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }

    pub fn handle(&self) -> Option<ExtractorHandle> {
        self.active.as_ref().map(|(handle, _)| *handle)
    }

    /// Loads the model if needed and schedules the extraction loop on
    /// `source`. On [`MotionLabError::ModelLoad`] the extractor stays idle.
    pub fn start(
        &mut self,
        scheduler: &mut FrameScheduler,
        source: VideoSource,
    ) -> Result<ExtractorHandle> {
        self.stop(scheduler);
        let detector = self.cache.get_or_load(&self.config)?;

        self.sessions += 1;
        let session = self.sessions;
        let task = scheduler.schedule(Box::new(ExtractorTask {
            detector: detector.clone(),
            source,
            writer: self.writer.clone(),
            options: EstimateOptions::from(&self.config),
            failures: 0,
        }));
        let handle = ExtractorHandle { task, session };
        self.active = Some((handle, detector));
        tracing::debug!(session, %task, "pose extractor started");
        Ok(handle)
    }

    /// Stops the loop, releases per-session detector state and publishes the
    /// empty frame. Calling it while idle does nothing.
    pub fn stop(&mut self, scheduler: &mut FrameScheduler) -> bool {
        let stopped = self.halt(scheduler);
        self.clear();
        stopped
    }

    pub(crate) fn halt(&mut self, scheduler: &mut FrameScheduler) -> bool {
        let Some((handle, detector)) = self.active.take() else {
            return false;
        };
        scheduler.cancel(handle.task);
        lock_detector(&detector).reset();
        tracing::debug!(session = handle.session, "pose extractor stopped");
        true
    }

    pub(crate) fn clear(&self) {
        if *self.reader.latest() != PoseFrame::empty() {
            self.writer.publish(PoseFrame::empty());
        }
    }

    /// Final teardown: stops the loop and frees the cached model.
    pub fn shutdown(&mut self, scheduler: &mut FrameScheduler) {
        self.stop(scheduler);
        self.cache.release();
    }
}

impl std::fmt::Debug for PoseExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoseExtractor")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("active", &self.handle())
            .finish()
    }
}

// A detector that panicked mid-call still holds a loaded model.
fn lock_detector(detector: &SharedDetector) -> MutexGuard<'_, Box<dyn PoseDetector>> {
    detector.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ExtractorTask {
    detector: SharedDetector,
    source: VideoSource,
    writer: Arc<SnapshotWriter<PoseFrame>>,
    options: EstimateOptions,
    failures: u64,
}

impl FrameTask for ExtractorTask {
    fn name(&self) -> &'static str {
        "pose-extractor"
    }

    fn tick(&mut self, frame: &FrameInfo) -> TaskControl {
        if self.source.is_closed() {
            self.writer.publish(PoseFrame::empty());
            return TaskControl::Finish;
        }
        let Some(video) = self.source.current_frame() else {
            return TaskControl::Reschedule;
        };

        let estimate = lock_detector(&self.detector).estimate(&video, &self.options);
        match estimate {
            Ok(subjects) => {
                let width = video.width as f32;
                let height = video.height as f32;
                let best = subjects
                    .into_iter()
                    .max_by(|a, b| a.confidence().total_cmp(&b.confidence()));
                let pose = match best {
                    Some(subject) => PoseFrame {
                        landmarks: subject.into_landmarks(),
                        source_width: width,
                        source_height: height,
                    },
                    None => PoseFrame::no_subject(width, height),
                };
                self.writer.publish(pose);
            }
            Err(err) => {
                self.failures += 1;
                tracing::warn!(
                    %err,
                    frame = frame.index,
                    failures = self.failures,
                    "pose estimate failed, retrying next frame"
                );
            }
        }
        TaskControl::Reschedule
    }
}
