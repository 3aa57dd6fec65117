use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{MotionLabError, Result};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub camera: CameraConfig,
    pub pose: PoseConfig,
    pub display: DisplayConfig,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads a JSON configuration file. Missing sections fall back to their
    /// defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: AppConfig = serde_json::from_str(&raw).map_err(|err| {
            MotionLabError::msg(format!(
                "invalid config `{}`: {err}",
                path.as_ref().display()
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;
        self.camera.validate()?;
        self.pose.validate()?;
        if self.display.refresh_hz == 0 {
            return Err(MotionLabError::InvalidInput(
                "display refresh rate must be positive",
            ));
        }
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Analysis window in samples. The published spectrum holds half as many
    /// bins.
    pub fft_size: usize,
    /// Exponential smoothing applied between consecutive analysis ticks.
    pub smoothing_time_constant: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    /// Frames pushed per callback by the clocked file playback.
    pub playback_chunk: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            fft_size: 1024,
            smoothing_time_constant: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            playback_chunk: 512,
        }
    }
}

impl AudioConfig {
    /// Number of magnitude bins produced per tick.
    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(32..=32_768).contains(&self.fft_size) {
            return Err(MotionLabError::InvalidInput(
                "fft size must be a power of two between 32 and 32768",
            ));
        }
        if !(0.0..=1.0).contains(&self.smoothing_time_constant) {
            return Err(MotionLabError::InvalidInput(
                "smoothing time constant must lie in [0, 1]",
            ));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(MotionLabError::InvalidInput(
                "min decibels must be below max decibels",
            ));
        }
        if self.playback_chunk == 0 {
            return Err(MotionLabError::InvalidInput(
                "playback chunk must hold at least one frame",
            ));
        }
        Ok(())
    }
}

/// Requested camera resolution. Devices may grant something else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
        }
    }
}

impl CameraConfig {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(MotionLabError::InvalidInput(
                "camera resolution must be non-zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub max_subjects: usize,
    /// Mirror detections horizontally so the avatar follows the user like a
    /// mirror.
    pub mirror: bool,
    /// Landmarks below this confidence are kept but not drawn.
    pub min_confidence: f32,
    pub model_path: Option<PathBuf>,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            max_subjects: 1,
            mirror: true,
            min_confidence: 0.2,
            model_path: None,
        }
    }
}

impl PoseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_subjects == 0 {
            return Err(MotionLabError::InvalidInput(
                "pose detection needs at least one subject",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(MotionLabError::InvalidInput(
                "minimum landmark confidence must lie in [0, 1]",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub refresh_hz: u32,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self { refresh_hz: 60 }
    }
}
