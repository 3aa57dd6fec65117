//! MoveNet single-pose detector running on ONNX Runtime.
//!
//! The model takes one `[1, 192, 192, 3]` int32 RGB image and returns
//! `[1, 1, 17, 3]` rows of normalised `(y, x, score)` in keypoint order.

use std::path::Path;

use ndarray::Array4;
use ort::session::Session;
use ort::value::Tensor;

use super::{DetectorFactory, EstimateOptions, Landmark, PoseDetector, Subject, LANDMARK_COUNT};
use crate::video::VideoFrame;
use crate::{MotionLabError, PoseConfig, Result};

const INPUT_SIZE: usize = 192;

pub struct MoveNetDetector {
    session: Session,
    input_name: String,
}

impl MoveNetDetector {
    pub fn load(model_path: &Path) -> Result<Self> {
        if !model_path.exists() {
            return Err(MotionLabError::ModelLoad(format!(
                "model not found: {}",
                model_path.display()
            )));
        }

        let session = Session::builder()
            .and_then(|builder| builder.with_intra_threads(1))
            .and_then(|builder| builder.commit_from_file(model_path))
            .map_err(|err| MotionLabError::ModelLoad(err.to_string()))?;
        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| MotionLabError::ModelLoad("model declares no inputs".into()))?;

        tracing::info!(path = %model_path.display(), input = %input_name, "loaded MoveNet");
        Ok(Self { session, input_name })
    }
}

impl PoseDetector for MoveNetDetector {
    fn estimate(&mut self, frame: &VideoFrame, options: &EstimateOptions) -> Result<Vec<Subject>> {
        let input = Tensor::from_array(resize_to_input(frame))
            .map_err(|err| MotionLabError::TransientInference(err.to_string()))?;
        let outputs = self
            .session
            .run(ort::inputs![self.input_name.as_str() => input])
            .map_err(|err| MotionLabError::TransientInference(err.to_string()))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| MotionLabError::TransientInference("model produced no output".into()))?;
        let (_shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|err| MotionLabError::TransientInference(err.to_string()))?;
        if data.len() < LANDMARK_COUNT * 3 {
            return Err(MotionLabError::TransientInference(format!(
                "expected {} keypoint values, got {}",
                LANDMARK_COUNT * 3,
                data.len()
            )));
        }

        let width = frame.width as f32;
        let height = frame.height as f32;
        let keypoints = data
            .chunks_exact(3)
            .take(LANDMARK_COUNT)
            .map(|row| {
                let x = row[1] * width;
                let x = if options.mirror { width - x } else { x };
                Landmark::new(x, row[0] * height, row[2].clamp(0.0, 1.0))
            })
            .collect();

        Ok(vec![Subject {
            keypoints,
            score: None,
        }])
    }
}

/// Loads [`MoveNetDetector`] from the configured model path.
#[derive(Debug, Default, Clone, Copy)]
pub struct MoveNetFactory;

impl DetectorFactory for MoveNetFactory {
    fn create(&self, config: &PoseConfig) -> Result<Box<dyn PoseDetector>> {
        let path = config
            .model_path
            .as_deref()
            .ok_or_else(|| MotionLabError::ModelLoad("no MoveNet model path configured".into()))?;
        Ok(Box::new(MoveNetDetector::load(path)?))
    }
}

// Nearest-neighbour resize; MoveNet is tolerant of the aliasing.
fn resize_to_input(frame: &VideoFrame) -> Array4<i32> {
    let mut input = Array4::<i32>::zeros((1, INPUT_SIZE, INPUT_SIZE, 3));
    for row in 0..INPUT_SIZE {
        let y = (row * frame.height as usize / INPUT_SIZE) as u32;
        for col in 0..INPUT_SIZE {
            let x = (col * frame.width as usize / INPUT_SIZE) as u32;
            let [r, g, b] = frame.pixel(x, y);
            input[[0, row, col, 0]] = i32::from(r);
            input[[0, row, col, 1]] = i32::from(g);
            input[[0, row, col, 2]] = i32::from(b);
        }
    }
    input
}
