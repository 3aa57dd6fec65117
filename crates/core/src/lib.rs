//! Core library for the Motion Lab application.
//!
//! Two producer loops, spectral audio analysis and pose extraction, publish
//! latest-value snapshots that a render loop reads once per display refresh.
//! A lifecycle manager owns every capture device and enforces the per-device
//! state machine; everything runs cooperatively on one frame scheduler.

pub mod analysis;
pub mod audio;
pub mod config;
pub mod devices;
pub mod error;
pub mod lifecycle;
pub mod media;
pub mod pipeline;
pub mod pose;
pub mod render;
pub mod scene;
pub mod snapshot;
pub mod timeline;
pub mod video;

pub use analysis::{AudioFeatures, SpectralTransform};
pub use audio::{
    sample_tap, AudioInput, AudioSignalHandle, AudioSourceKind, SampleTap, SpectralAnalyzer,
    TapWriter,
};
pub use config::{AppConfig, AudioConfig, CameraConfig, DisplayConfig, PoseConfig};
pub use error::{MotionLabError, Result};
pub use lifecycle::{
    DeviceBackend, DeviceKind, LifecycleManager, SessionState, StatusBadge, StatusTone,
};
pub use media::{DecodedAudio, MediaElement, MediaLedger};
pub use pipeline::Pipeline;
pub use pose::{
    DetectorFactory, Keypoint, Landmark, PoseDetector, PoseExtractor, PoseFrame, Subject,
};
pub use render::{RenderSink, RenderState, RenderSynchronizer};
pub use scene::{SceneLayout, Viewport};
pub use snapshot::{snapshot_cell, Snapshot, SnapshotReader, SnapshotWriter};
pub use timeline::{FrameInfo, FrameScheduler, FrameTask, TaskControl, TaskPhase};
pub use video::{CameraStream, Resolution, VideoFrame, VideoSource};
