use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::snapshot::{snapshot_cell, SnapshotReader, SnapshotWriter};

/// Pixel dimensions of a video stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One packed RGB8 frame as delivered by a camera.
#[derive(Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub pixels: Arc<[u8]>,
    pub sequence: u64,
}

impl VideoFrame {
    /// Returns `None` when `pixels` does not hold `width * height` RGB
    /// triplets.
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>, sequence: u64) -> Option<Self> {
        let expected = width as usize * height as usize * 3;
        (pixels.len() == expected && expected > 0).then(|| Self {
            width,
            height,
            pixels: pixels.into(),
            sequence,
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// RGB triplet at `(x, y)`, clamped to the frame bounds.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let x = x.min(self.width.saturating_sub(1)) as usize;
        let y = y.min(self.height.saturating_sub(1)) as usize;
        let offset = (y * self.width as usize + x) * 3;
        [
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ]
    }
}

impl fmt::Debug for VideoFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
struct FeedState {
    frame: Option<VideoFrame>,
    closed: bool,
}

/// Creates the pair used by a camera backend to hand frames to the pose
/// extractor.
pub fn video_feed(granted: Resolution) -> (VideoSink, VideoSource) {
    let (writer, reader) = snapshot_cell(FeedState::default());
    (
        VideoSink { writer },
        VideoSource {
            reader,
            resolution: granted,
        },
    )
}

/// Writing end owned by the camera backend.
#[derive(Debug)]
pub struct VideoSink {
    writer: SnapshotWriter<FeedState>,
}

impl VideoSink {
    pub fn push(&self, frame: VideoFrame) {
        self.writer.publish(FeedState {
            frame: Some(frame),
            closed: false,
        });
    }

    /// Marks the feed as ended. Readers see no frame afterwards.
    pub fn close(&self) {
        self.writer.publish(FeedState {
            frame: None,
            closed: true,
        });
    }
}

/// Latest-frame view of a live camera.
#[derive(Debug, Clone)]
pub struct VideoSource {
    reader: SnapshotReader<FeedState>,
    resolution: Resolution,
}

impl VideoSource {
    /// Resolution granted by the device, which may differ from the request.
    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn current_frame(&self) -> Option<VideoFrame> {
        self.reader.latest().frame.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.reader.latest().closed
    }
}

/// An acquired camera stream.
pub trait CameraStream {
    fn source(&self) -> VideoSource;

    /// Stops every track of the device. Idempotent.
    fn close(&mut self);

    fn is_closed(&self) -> bool;
}
