//! Display-refresh consumer of the producer snapshots.

use crate::pose::PoseFrame;
use crate::snapshot::{Snapshot, SnapshotReader};
use crate::timeline::{FrameInfo, FrameTask, TaskControl};
use crate::AudioFeatures;

/// The snapshot pair handed to drawing code for one refresh.
///
/// Each half is individually complete. The two halves may come from
/// different producer ticks.
#[derive(Debug, Clone)]
pub struct RenderState {
    pub frame: FrameInfo,
    pub audio: Snapshot<AudioFeatures>,
    pub pose: Snapshot<PoseFrame>,
    /// Whether the audio producer published since the previous refresh.
    pub audio_fresh: bool,
    pub pose_fresh: bool,
}

/// Drawing routine invoked once per refresh. Must not block.
pub trait RenderSink {
    fn render(&mut self, state: &RenderState);
}

impl<F> RenderSink for F
where
    F: FnMut(&RenderState),
{
    fn render(&mut self, state: &RenderState) {
        self(state)
    }
}

/// Reads the latest audio and pose snapshots on every refresh and forwards
/// them to a [`RenderSink`]. Never waits on a producer; a producer that has
/// not ticked simply has its previous snapshot reused.
///
/// Schedule it in [`TaskPhase::Present`](crate::timeline::TaskPhase) so it
/// reads what the producers published in the same refresh.
pub struct RenderSynchronizer {
    audio: SnapshotReader<AudioFeatures>,
    pose: SnapshotReader<PoseFrame>,
    sink: Box<dyn RenderSink>,
    last_audio: Option<u64>,
    last_pose: Option<u64>,
    rendered: u64,
}

impl RenderSynchronizer {
    pub fn new(
        audio: SnapshotReader<AudioFeatures>,
        pose: SnapshotReader<PoseFrame>,
        sink: Box<dyn RenderSink>,
    ) -> Self {
        Self {
            audio,
            pose,
            sink,
            last_audio: None,
            last_pose: None,
            rendered: 0,
        }
    }

    /// Takes the current snapshot pair without rendering it.
    pub fn read(&mut self, frame: &FrameInfo) -> RenderState {
        let audio = self.audio.latest();
        let pose = self.pose.latest();
        let audio_fresh = self.last_audio != Some(audio.sequence());
        let pose_fresh = self.last_pose != Some(pose.sequence());
        self.last_audio = Some(audio.sequence());
        self.last_pose = Some(pose.sequence());
        RenderState {
            frame: *frame,
            audio,
            pose,
            audio_fresh,
            pose_fresh,
        }
    }

    pub fn rendered(&self) -> u64 {
        self.rendered
    }
}

impl FrameTask for RenderSynchronizer {
    fn name(&self) -> &'static str {
        "render"
    }

    fn tick(&mut self, frame: &FrameInfo) -> TaskControl {
        let state = self.read(frame);
        self.sink.render(&state);
        self.rendered += 1;
        TaskControl::Reschedule
    }
}

impl std::fmt::Debug for RenderSynchronizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSynchronizer")
            .field("last_audio", &self.last_audio)
            .field("last_pose", &self.last_pose)
            .field("rendered", &self.rendered)
            .finish()
    }
}
