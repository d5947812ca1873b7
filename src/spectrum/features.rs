// Feature generation
// Turns an audio example into its note band vector plus scalar features

use super::bands::{BandAggregation, NoteBand, NoteRange};
use super::fft::{SpectrumAnalyzer, SpectrumResult};
use crate::audio::AudioExample;
use crate::config::FeatureConfig;

/// Scalar features appended after the note bands
pub const SCALAR_FEATURE_COUNT: usize = 2;

/// Produces the feature vector stored for each example
pub trait FeatureGenerator {
    /// Length of every vector returned by `generate`
    fn feature_len(&self) -> usize;

    /// Feature vector for `example`, or `None` when the example is shorter
    /// than one analysis window
    fn generate(&self, example: &AudioExample) -> SpectrumResult<Option<Vec<f32>>>;
}

/// Note band magnitudes followed by RMS level and spectral centroid (Hz)
pub struct SpectrumFeatureBuilder {
    analyzer: SpectrumAnalyzer,
    note_range: NoteRange,
    band_size: f64,
    aggregation: BandAggregation,
}

impl SpectrumFeatureBuilder {
    pub fn new(config: &FeatureConfig) -> SpectrumResult<Self> {
        Ok(SpectrumFeatureBuilder {
            analyzer: SpectrumAnalyzer::new(config.sample_count, config.sample_rate)?,
            note_range: config.note_range,
            band_size: config.band_size,
            aggregation: config.aggregation,
        })
    }

    pub fn note_range(&self) -> NoteRange {
        self.note_range
    }

    /// Note bands of the first window of `samples`
    pub fn bands(&self, samples: &[f32]) -> SpectrumResult<Option<Vec<NoteBand>>> {
        Ok(self
            .analyzer
            .spectrum(samples)?
            .map(|spectrum| spectrum.bands(self.note_range, self.band_size, self.aggregation)))
    }
}

impl FeatureGenerator for SpectrumFeatureBuilder {
    fn feature_len(&self) -> usize {
        self.note_range.len() + SCALAR_FEATURE_COUNT
    }

    fn generate(&self, example: &AudioExample) -> SpectrumResult<Option<Vec<f32>>> {
        let spectrum = match self.analyzer.spectrum(&example.samples)? {
            Some(spectrum) => spectrum,
            None => return Ok(None),
        };

        let mut features: Vec<f32> = spectrum
            .bands(self.note_range, self.band_size, self.aggregation)
            .iter()
            .map(|band| band.magnitude)
            .collect();

        let window = &example.samples[..self.analyzer.sample_count()];
        features.push(calculate_rms(window));
        features.push(calculate_spectral_centroid(
            &spectrum.magnitudes,
            spectrum.base_frequency,
        ));

        Ok(Some(features))
    }
}

/// Root mean square level of a window
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Magnitude-weighted mean frequency in Hz
fn calculate_spectral_centroid(spectrum: &[f32], base_frequency: f64) -> f32 {
    let mut weighted_sum = 0.0;
    let mut total_magnitude = 0.0;

    for (i, &magnitude) in spectrum.iter().enumerate() {
        weighted_sum += i as f64 * base_frequency * magnitude as f64;
        total_magnitude += magnitude as f64;
    }

    if total_magnitude > 0.0 {
        (weighted_sum / total_magnitude) as f32
    } else {
        0.0
    }
}
