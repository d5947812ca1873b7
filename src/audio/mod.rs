// Audio processing module
// WAV ingestion and example windowing

pub mod examples;
pub mod ingest;

pub use examples::{AudioExample, ExampleBuilder, ExampleKind, LabelKind, WavExampleBuilder, WindowConfig};
pub use ingest::{ingest_wav, ingest_wav_file, AudioData, AudioError, AudioResult};
