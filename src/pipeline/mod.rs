// Run monitoring module
// JSONL trace of compile and shuffle progress

pub mod trace;

pub use trace::{read_trace_file, TraceEntry, TraceError, TraceWriter};
