// Spectral analysis module
// Magnitude spectra, note band mapping and feature vectors

pub mod bands;
pub mod features;
pub mod fft;

pub use bands::{
    frequency_to_display_x, map_spectrum_to_bands, note_for_band, note_label, BandAggregation,
    BandError, FrequencyScale, NoteBand, NoteRange, PowerSpectrum,
};
pub use features::{FeatureGenerator, SpectrumFeatureBuilder};
pub use fft::{SpectrumAnalyzer, SpectrumError, SpectrumResult};
