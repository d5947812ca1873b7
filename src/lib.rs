// Feature Compiler - note-aligned spectral features for transcription datasets
// Module declarations

pub mod audio;
pub mod compile;
pub mod config;
pub mod pipeline;
pub mod spectrum;
pub mod state;

pub use compile::{Category, CompileError, CompileSummary, FeatureCompiler, FolderProgress};
pub use config::{load_config, CompilerConfig, ConfigError, FeatureConfig};
pub use spectrum::{frequency_to_display_x, map_spectrum_to_bands, note_label, FrequencyScale};
pub use state::{Dataset, FeatureStore, SqliteFeatureStore};
