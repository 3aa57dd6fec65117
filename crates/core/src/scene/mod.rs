//! Display geometry for the avatar and skeleton views.
//!
//! Everything here is a pure function of a [`RenderState`] and a viewport, so
//! any drawing backend can consume it.

use serde::{Deserialize, Serialize};

use crate::pose::{PoseFrame, SKELETON_EDGES};
use crate::render::RenderState;
use crate::AudioFeatures;

pub const SPECTRUM_BARS: usize = 60;
const BAR_MAX_HEIGHT: f32 = 80.0;
const BAR_BASELINE_OFFSET: f32 = 12.0;
const JOINT_RADIUS: f32 = 6.0;

pub const NO_SUBJECT_HINT: &str = "Stand in front of your webcam to drive the motion capture rig.";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

impl Viewport {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    pub center: Point,
    pub radius: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Point,
    pub end: Point,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Mouth curve: a quadratic from `left` to `right` bending down by `depth`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mouth {
    pub left: Point,
    pub right: Point,
    pub depth: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvatarLayout {
    pub head: Circle,
    pub eyes: [Circle; 2],
    pub mouth: Mouth,
    pub torso: Segment,
    pub arms: [Segment; 2],
    pub bars: Vec<Rect>,
}

impl AvatarLayout {
    /// Lays out the audio-driven avatar. The mouth opens with loudness; the
    /// bar strip is omitted while the spectrum is empty.
    pub fn compute(audio: &AudioFeatures, viewport: Viewport) -> Self {
        let Viewport { width, height } = viewport;
        let center = Point {
            x: width / 2.0,
            y: height * 0.42,
        };
        let radius = width.min(height) * 0.22;

        let eye_dx = radius * 0.55;
        let eye_y = center.y - radius * 0.2;
        let eye = |x: f32| Circle {
            center: Point { x, y: eye_y },
            radius: radius * 0.12,
        };

        let level = audio.loudness.clamp(0.0, 1.0);
        let mouth_width = radius * 1.3;
        let mouth_y = center.y + radius * 0.55;
        let mouth = Mouth {
            left: Point {
                x: center.x - mouth_width / 2.0,
                y: mouth_y,
            },
            right: Point {
                x: center.x + mouth_width / 2.0,
                y: mouth_y,
            },
            depth: radius * (0.12 + level * 0.45),
        };

        let body_top = mouth_y + radius * 0.5;
        let shoulder = Point {
            x: center.x,
            y: body_top + radius * 0.6,
        };
        let hand = |x: f32| Segment {
            start: shoulder,
            end: Point {
                x,
                y: body_top + radius * 1.4,
            },
        };

        Self {
            head: Circle { center, radius },
            eyes: [eye(center.x - eye_dx), eye(center.x + eye_dx)],
            mouth,
            torso: Segment {
                start: Point {
                    x: center.x,
                    y: body_top,
                },
                end: Point {
                    x: center.x,
                    y: body_top + radius * 2.0,
                },
            },
            arms: [hand(center.x - radius), hand(center.x + radius)],
            bars: spectrum_bars(&audio.spectrum, viewport),
        }
    }
}

fn spectrum_bars(spectrum: &[u8], viewport: Viewport) -> Vec<Rect> {
    if spectrum.is_empty() {
        return Vec::new();
    }
    let base = viewport.height - BAR_BASELINE_OFFSET;
    let segment = viewport.width / SPECTRUM_BARS as f32;
    (0..SPECTRUM_BARS)
        .map(|i| {
            let index = (i * spectrum.len() / SPECTRUM_BARS).min(spectrum.len() - 1);
            let bar_height = f32::from(spectrum[index]) / 255.0 * BAR_MAX_HEIGHT;
            Rect {
                x: i as f32 * segment,
                y: base - bar_height,
                width: segment * 0.6,
                height: bar_height,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkeletonLayout {
    pub bones: Vec<Segment>,
    pub joints: Vec<Circle>,
    /// Shown instead of the skeleton while no subject is tracked.
    pub hint: Option<&'static str>,
}

impl SkeletonLayout {
    /// Scales landmarks from source pixels into `viewport`. Edges and joints
    /// below `min_confidence` are skipped; the data itself is never filtered.
    pub fn compute(pose: &PoseFrame, viewport: Viewport, min_confidence: f32) -> Self {
        if !pose.has_subject() {
            return Self {
                bones: Vec::new(),
                joints: Vec::new(),
                hint: Some(NO_SUBJECT_HINT),
            };
        }

        let scale_x = viewport.width / pose.source_width.max(f32::EPSILON);
        let scale_y = viewport.height / pose.source_height.max(f32::EPSILON);
        let project = |x: f32, y: f32| Point {
            x: x * scale_x,
            y: y * scale_y,
        };

        let bones = SKELETON_EDGES
            .iter()
            .filter_map(|&(from, to)| {
                let start = pose.landmark(from)?;
                let end = pose.landmark(to)?;
                (start.is_reliable(min_confidence) && end.is_reliable(min_confidence)).then(|| {
                    Segment {
                        start: project(start.x, start.y),
                        end: project(end.x, end.y),
                    }
                })
            })
            .collect();

        let joints = pose
            .landmarks
            .iter()
            .filter(|landmark| landmark.is_reliable(min_confidence))
            .map(|landmark| Circle {
                center: project(landmark.x, landmark.y),
                radius: JOINT_RADIUS,
            })
            .collect();

        Self {
            bones,
            joints,
            hint: None,
        }
    }
}

/// Both views for one refresh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SceneLayout {
    pub avatar: AvatarLayout,
    pub skeleton: SkeletonLayout,
}

impl SceneLayout {
    pub fn compute(
        state: &RenderState,
        avatar: Viewport,
        skeleton: Viewport,
        min_confidence: f32,
    ) -> Self {
        Self {
            avatar: AvatarLayout::compute(&state.audio, avatar),
            skeleton: SkeletonLayout::compute(&state.pose, skeleton, min_confidence),
        }
    }
}
