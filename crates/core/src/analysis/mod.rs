use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};

use crate::{AudioConfig, MotionLabError, Result};

/// Loudness and spectrum published once per analysis tick.
///
/// Snapshots are immutable once published and superseded wholesale by the
/// next tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    /// Mean spectrum magnitude normalised to [0, 1].
    pub loudness: f32,
    /// Byte-range magnitude per frequency bin. Empty when no analyzer is
    /// running.
    pub spectrum: Vec<u8>,
    /// Monotonic tick counter of the producing session.
    pub frame_sequence: u64,
}

impl AudioFeatures {
    /// The value published whenever analysis is stopped.
    pub fn silent() -> Self {
        Self::default()
    }

    pub fn is_silent(&self) -> bool {
        self.loudness == 0.0 && self.spectrum.is_empty()
    }
}

/// Arithmetic mean of the spectrum normalised to [0, 1].
pub fn loudness(spectrum: &[u8]) -> f32 {
    if spectrum.is_empty() {
        return 0.0;
    }
    let sum: u64 = spectrum.iter().map(|&bin| u64::from(bin)).sum();
    let mean = sum as f32 / spectrum.len() as f32;
    (mean / 255.0).clamp(0.0, 1.0)
}

/// Frequency-domain stage producing byte magnitudes from the most recent
/// window of samples.
///
/// Each call windows the input with a Blackman window, takes the magnitude of
/// the real FFT scaled by the window length, blends it with the previous
/// result using the configured time constant and maps the decibel value of
/// every bin from `[min_decibels, max_decibels]` onto `0..=255`. The time
/// constant is fixed at construction.
pub struct SpectralTransform {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl SpectralTransform {
    pub fn new(config: &AudioConfig) -> Result<Self> {
        config.validate()?;
        let fft_size = config.fft_size;
        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let fft = FftResources {
            size: fft_size,
            scratch: plan.make_scratch_vec(),
            spectrum: plan.make_output_vec(),
            input: plan.make_input_vec(),
            plan,
        };

        Ok(Self {
            fft_size,
            smoothing: config.smoothing_time_constant,
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            window: (0..fft_size).map(|i| blackman_value(i, fft_size)).collect(),
            smoothed: vec![0.0; fft_size / 2],
            fft,
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing
    }

    /// Forgets the smoothing history, as a freshly built stage would.
    pub fn reset(&mut self) {
        self.smoothed.iter_mut().for_each(|value| *value = 0.0);
    }

    /// Writes byte magnitudes for `samples` into `out`.
    ///
    /// `samples` must hold exactly one window and `out` exactly
    /// [`bin_count`](Self::bin_count) bins.
    pub fn byte_frequency_data(&mut self, samples: &[f32], out: &mut [u8]) -> Result<()> {
        if samples.len() != self.fft_size {
            return Err(MotionLabError::InvalidInput(
                "spectral transform requires exactly one analysis window",
            ));
        }
        if out.len() != self.bin_count() {
            return Err(MotionLabError::InvalidInput(
                "spectrum buffer must match the bin count",
            ));
        }

        for ((slot, sample), weight) in self
            .fft
            .input
            .iter_mut()
            .zip(samples)
            .zip(&self.window)
        {
            *slot = sample * weight;
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let scale = 1.0 / self.fft_size as f32;
        let range = self.max_decibels - self.min_decibels;
        for ((byte, smoothed), bin) in out
            .iter_mut()
            .zip(self.smoothed.iter_mut())
            .zip(&self.fft.spectrum)
        {
            let magnitude = bin.norm() * scale;
            let blended = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
            *smoothed = if blended.is_finite() { blended } else { 0.0 };

            *byte = if *smoothed <= 0.0 {
                0
            } else {
                let decibels = 20.0 * smoothed.log10();
                let scaled = 255.0 * (decibels - self.min_decibels) / range;
                scaled.clamp(0.0, 255.0) as u8
            };
        }

        Ok(())
    }
}

struct FftResources {
    size: usize,
    plan: Arc<dyn RealToComplex<f32>>,
    scratch: Vec<Complex32>,
    spectrum: Vec<Complex32>,
    input: Vec<f32>,
}

impl fmt::Debug for SpectralTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectralTransform")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .field("fft", &self.fft)
            .finish()
    }
}

impl fmt::Debug for FftResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftResources")
            .field("size", &self.size)
            .finish()
    }
}

fn blackman_value(index: usize, len: usize) -> f32 {
    const ALPHA: f32 = 0.16;
    let a0 = 0.5 * (1.0 - ALPHA);
    let a1 = 0.5;
    let a2 = 0.5 * ALPHA;
    let phase = 2.0 * PI * index as f32 / len as f32;
    a0 - a1 * phase.cos() + a2 * (2.0 * phase).cos()
}
