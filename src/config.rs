// Compiler configuration
// Category roots, dataset routing and feature extraction parameters

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::audio::WindowConfig;
use crate::spectrum::bands::{BandAggregation, NoteRange};
use crate::state::storage::calculate_sha256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid configuration parameter: {0}")]
    Invalid(String),
}

/// Feature extraction parameters. Changing any of these changes the
/// feature vectors, so they are fingerprinted into each dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Sample rate every recording must have
    pub sample_rate: u32,

    /// Samples per analysis window (FFT length)
    pub sample_count: usize,

    /// Samples between consecutive windows of a recording
    pub step_size: usize,

    /// Notes represented in the band vector and the label space
    pub note_range: NoteRange,

    /// Width of each note band in semitones
    pub band_size: f64,

    pub aggregation: BandAggregation,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            sample_rate: 44100,
            sample_count: 8192,
            step_size: 1024,
            note_range: NoteRange { start: 24, end: 96 },
            band_size: 1.0,
            aggregation: BandAggregation::Mean,
        }
    }
}

impl FeatureConfig {
    pub fn window_config(&self) -> WindowConfig {
        WindowConfig {
            sample_rate: self.sample_rate,
            sample_count: self.sample_count,
            step_size: self.step_size,
            note_range: self.note_range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShuffleConfig {
    /// Records rewritten per transaction
    pub chunk_size: usize,
    pub passes: usize,
}

impl Default for ShuffleConfig {
    fn default() -> Self {
        ShuffleConfig {
            chunk_size: 1024,
            passes: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    pub noise_root: PathBuf,
    pub mono_root: PathBuf,
    pub poly_root: PathBuf,

    /// Folder names routed to the testing dataset
    pub testing_folders: Vec<String>,

    pub training_path: PathBuf,
    pub testing_path: PathBuf,

    /// Start both datasets from scratch
    pub overwrite: bool,

    pub features: FeatureConfig,
    pub shuffle: ShuffleConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            noise_root: PathBuf::from("../AudioData/Noise/"),
            mono_root: PathBuf::from("../AudioData/Monophonic/"),
            poly_root: PathBuf::from("../AudioData/Polyphonic/"),
            testing_folders: [
                "Arachno",
                "VenturePianoQuiet1",
                "VentureFast1",
                "mozart",
                "muss",
                "alfred40829",
                "godow",
                "alfred42458",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            training_path: PathBuf::from("training.db"),
            testing_path: PathBuf::from("testing.db"),
            overwrite: false,
            features: FeatureConfig::default(),
            shuffle: ShuffleConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// SHA-256 of the feature parameters
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_vec(&self.features)?;
        Ok(calculate_sha256(&json))
    }
}

/// Load and validate a JSON configuration file.
/// Missing fields fall back to their defaults.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CompilerConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: CompilerConfig = serde_json::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &CompilerConfig) -> Result<(), ConfigError> {
    let features = &config.features;

    let range = features.note_range;
    if range.start > range.end || range.end > 127 {
        return Err(ConfigError::Invalid(format!(
            "note range {}..={} is empty or beyond MIDI 127",
            range.start, range.end
        )));
    }
    if features.sample_rate == 0 {
        return Err(ConfigError::Invalid("sample_rate must be positive".to_string()));
    }
    if features.sample_count < 2 {
        return Err(ConfigError::Invalid("sample_count must be at least 2".to_string()));
    }
    if features.step_size == 0 {
        return Err(ConfigError::Invalid("step_size must be positive".to_string()));
    }
    if !(features.band_size > 0.0) {
        return Err(ConfigError::Invalid("band_size must be positive".to_string()));
    }
    if config.shuffle.chunk_size == 0 {
        return Err(ConfigError::Invalid("shuffle chunk_size must be positive".to_string()));
    }
    if config.training_path == config.testing_path {
        return Err(ConfigError::Invalid(
            "training and testing datasets must be different files".to_string(),
        ));
    }

    Ok(())
}
