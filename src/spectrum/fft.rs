// Windowed magnitude spectrum
// Hamming window + real FFT over a fixed number of samples

use realfft::{RealFftPlanner, RealToComplex};
use std::sync::Arc;
use thiserror::Error;

use super::bands::PowerSpectrum;

#[derive(Debug, Error)]
pub enum SpectrumError {
    #[error("FFT failed: {0}")]
    Fft(#[from] realfft::FftError),

    #[error("Invalid analysis parameters: {0}")]
    InvalidParameters(String),
}

pub type SpectrumResult<T> = Result<T, SpectrumError>;

/// Computes magnitude spectra of fixed-length sample windows.
/// The window and FFT plan are built once and reused for every example.
pub struct SpectrumAnalyzer {
    sample_count: usize,
    sample_rate: u32,
    window: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_count: usize, sample_rate: u32) -> SpectrumResult<Self> {
        if sample_count < 2 {
            return Err(SpectrumError::InvalidParameters(format!(
                "sample count must be at least 2, got {}",
                sample_count
            )));
        }
        if sample_rate == 0 {
            return Err(SpectrumError::InvalidParameters(
                "sample rate must be positive".to_string(),
            ));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(sample_count);

        Ok(SpectrumAnalyzer {
            sample_count,
            sample_rate,
            window: hamming_window(sample_count),
            fft,
        })
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Hz covered by one FFT bin
    pub fn base_frequency(&self) -> f64 {
        self.sample_rate as f64 / self.sample_count as f64
    }

    /// Magnitude spectrum of the first `sample_count` samples.
    /// Returns `None` when fewer samples are available.
    pub fn spectrum(&self, samples: &[f32]) -> SpectrumResult<Option<PowerSpectrum>> {
        if samples.len() < self.sample_count {
            return Ok(None);
        }

        let mut input: Vec<f32> = samples[..self.sample_count]
            .iter()
            .zip(self.window.iter())
            .map(|(s, w)| s * w)
            .collect();
        let mut output = self.fft.make_output_vec();

        self.fft.process(&mut input, &mut output)?;

        // sqrt of the squared magnitude: amplitude rather than power
        let magnitudes = output.iter().map(|c| c.norm_sqr().sqrt()).collect();

        Ok(Some(PowerSpectrum {
            magnitudes,
            base_frequency: self.base_frequency(),
        }))
    }
}

/// Hamming window of length `n`: 0.54 - 0.46 cos(2πi/n)
pub fn hamming_window(n: usize) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }

    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / n as f32).cos())
        .collect()
}
