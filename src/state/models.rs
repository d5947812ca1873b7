// Data models for compiled feature datasets
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::audio::{AudioExample, LabelKind};
use crate::spectrum::bands::{note_label, BandError, NoteRange};

/// Which of the two persistent datasets a folder belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Training,
    Testing,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Training => "training",
            Dataset::Testing => "testing",
        }
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ground-truth labels stored alongside a feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureLabels {
    /// Dense 1-based note labels (see `note_label`)
    pub notes: Vec<u32>,

    pub onset: bool,

    /// Number of simultaneous notes
    pub polyphony: u32,
}

impl FeatureLabels {
    pub fn from_example(example: &AudioExample, note_range: NoteRange) -> Result<Self, BandError> {
        let notes = example
            .notes
            .iter()
            .map(|&note| note_label(note_range, note))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FeatureLabels {
            polyphony: notes.len() as u32,
            notes,
            onset: example.onset,
        })
    }

    pub fn kinds(&self) -> Vec<LabelKind> {
        let mut kinds = Vec::with_capacity(self.notes.len() + 2);
        if self.onset {
            kinds.push(LabelKind::Onset);
        }
        if self.polyphony > 0 {
            kinds.push(LabelKind::Polyphony);
        }
        kinds.extend(self.notes.iter().map(|&n| LabelKind::Note(n)));
        kinds
    }
}

/// Unit of persistence: labels plus the feature vector of one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    pub labels: FeatureLabels,
    pub features: Vec<f32>,
}

impl FeatureRecord {
    pub fn from_example(
        example: &AudioExample,
        note_range: NoteRange,
        features: Vec<f32>,
    ) -> Result<Self, BandError> {
        Ok(FeatureRecord {
            labels: FeatureLabels::from_example(example, note_range)?,
            features,
        })
    }
}

/// A folder committed to a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderEntry {
    pub name: String,
    pub run_id: Uuid,
    pub appended_at: DateTime<Utc>,
    pub record_count: i64,
}
