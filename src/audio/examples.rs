// Example builders
// Turn folders of labeled WAV recordings into fixed-length training examples

use serde::{Deserialize, Serialize};
use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use super::ingest::{ingest_wav_file, AudioError, AudioResult};
use crate::spectrum::bands::NoteRange;

/// Label categories a feature record can carry.
/// `Note` holds the dense 1-based note label, not the MIDI number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LabelKind {
    Onset,
    Polyphony,
    Note(u32),
}

/// One window of decoded audio with its ground-truth labels
#[derive(Debug, Clone)]
pub struct AudioExample {
    /// Mono samples normalized to [-1.0, 1.0]
    pub samples: Vec<f32>,

    pub sample_rate: u32,

    /// MIDI note numbers sounding in this window
    pub notes: Vec<u8>,

    /// True for the window containing the attack
    pub onset: bool,
}

impl AudioExample {
    pub fn polyphony(&self) -> usize {
        self.notes.len()
    }
}

/// Enumerates every example in a folder.
/// Implementations enumerate until `visit` returns `Break`, and surface I/O
/// errors instead of stopping early. No further file is decoded after a `Break`.
pub trait ExampleBuilder {
    fn for_each_example(
        &self,
        folder: &Path,
        visit: &mut dyn FnMut(AudioExample) -> ControlFlow<()>,
    ) -> AudioResult<()>;
}

/// Windowing parameters shared by the WAV builders
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConfig {
    pub sample_rate: u32,
    pub sample_count: usize,
    pub step_size: usize,
    pub note_range: NoteRange,
}

/// How notes are read from a recording's file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExampleKind {
    /// Background noise, no notes
    Noise,
    /// A single note, the last number in the file name (`piano_60.wav`)
    Monophonic,
    /// Every number in the file name is a sounding note (`60-64-67.wav`)
    Polyphonic,
}

/// Builds examples from the `.wav` files directly inside a folder
#[derive(Debug, Clone)]
pub struct WavExampleBuilder {
    kind: ExampleKind,
    windows: WindowConfig,
}

impl WavExampleBuilder {
    pub fn new(kind: ExampleKind, windows: WindowConfig) -> Self {
        WavExampleBuilder { kind, windows }
    }

    pub fn noise(windows: WindowConfig) -> Self {
        Self::new(ExampleKind::Noise, windows)
    }

    pub fn monophonic(windows: WindowConfig) -> Self {
        Self::new(ExampleKind::Monophonic, windows)
    }

    pub fn polyphonic(windows: WindowConfig) -> Self {
        Self::new(ExampleKind::Polyphonic, windows)
    }

    pub fn kind(&self) -> ExampleKind {
        self.kind
    }

    fn notes_for(&self, path: &Path) -> AudioResult<Vec<u8>> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let numbers = numbers_in(&stem);

        let notes = match self.kind {
            ExampleKind::Noise => Vec::new(),
            ExampleKind::Monophonic => match numbers.last() {
                Some(&note) => vec![note],
                None => {
                    return Err(AudioError::MissingLabel {
                        path: path.to_path_buf(),
                    })
                }
            },
            ExampleKind::Polyphonic => {
                if numbers.is_empty() {
                    return Err(AudioError::MissingLabel {
                        path: path.to_path_buf(),
                    });
                }
                numbers
            }
        };

        if let Some(&note) = notes
            .iter()
            .find(|n| !self.windows.note_range.contains(**n))
        {
            return Err(AudioError::LabelOutOfRange {
                path: path.to_path_buf(),
                note,
            });
        }

        Ok(notes)
    }
}

impl ExampleBuilder for WavExampleBuilder {
    fn for_each_example(
        &self,
        folder: &Path,
        visit: &mut dyn FnMut(AudioExample) -> ControlFlow<()>,
    ) -> AudioResult<()> {
        for path in wav_files(folder)? {
            let notes = self.notes_for(&path)?;
            let audio = ingest_wav_file(&path)?;
            if audio.sample_rate != self.windows.sample_rate {
                return Err(AudioError::SampleRateMismatch {
                    path,
                    expected: self.windows.sample_rate,
                    found: audio.sample_rate,
                });
            }

            let mono = audio.to_mono();
            for (index, window) in windows(&mono, self.windows.sample_count, self.windows.step_size)
                .into_iter()
                .enumerate()
            {
                let example = AudioExample {
                    samples: window.to_vec(),
                    sample_rate: audio.sample_rate,
                    notes: notes.clone(),
                    onset: index == 0,
                };
                if visit(example).is_break() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

/// Non-hidden `.wav` files in `folder`, sorted by name
fn wav_files(folder: &Path) -> AudioResult<Vec<PathBuf>> {
    let io_error = |source| AudioError::Io {
        path: folder.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in fs::read_dir(folder).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let hidden = path
            .file_name()
            .map(|n| n.to_string_lossy().starts_with('.'))
            .unwrap_or(true);
        let is_wav = path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);

        if !hidden && is_wav && path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Slice `samples` into windows of `size` every `step` samples.
/// A recording shorter than one window yields a single short window.
fn windows(samples: &[f32], size: usize, step: usize) -> Vec<&[f32]> {
    if samples.is_empty() {
        return Vec::new();
    }
    if samples.len() < size || size == 0 {
        return vec![samples];
    }

    let step = step.max(1);
    (0..=samples.len() - size)
        .step_by(step)
        .map(|start| &samples[start..start + size])
        .collect()
}

/// Runs of ASCII digits in `text` that fit a MIDI note number
fn numbers_in(text: &str) -> Vec<u8> {
    text.split(|c: char| !c.is_ascii_digit())
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<u8>().ok())
        .collect()
}
