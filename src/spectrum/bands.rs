// Note band mapping
// Maps a magnitude spectrum onto one band per musical note and converts
// frequencies to display positions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference pitch for MIDI note 69 (A4)
const A4_FREQUENCY: f64 = 440.0;
const A4_NOTE: f64 = 69.0;

#[derive(Debug, Error, PartialEq)]
pub enum BandError {
    #[error("note {note} is outside the range {start}..={end}")]
    NoteOutOfRange { note: u8, start: u8, end: u8 },

    #[error("invalid note range {start}..={end}")]
    InvalidRange { start: u8, end: u8 },
}

/// Closed range of MIDI note numbers, e.g. 21..=108 for an 88-key piano
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteRange {
    pub start: u8,
    pub end: u8,
}

impl NoteRange {
    pub fn new(start: u8, end: u8) -> Result<Self, BandError> {
        if start > end || end > 127 {
            return Err(BandError::InvalidRange { start, end });
        }
        Ok(NoteRange { start, end })
    }

    /// The 88 keys of a piano
    pub fn piano() -> Self {
        NoteRange { start: 21, end: 108 }
    }

    /// Number of notes in the range (both ends included)
    pub fn len(&self) -> usize {
        if self.start > self.end {
            return 0;
        }
        (self.end - self.start) as usize + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, note: u8) -> bool {
        note >= self.start && note <= self.end
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> {
        self.start..=self.end
    }
}

/// How the bins inside a note's frequency window are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandAggregation {
    #[default]
    Mean,
    Sum,
    Max,
}

/// Horizontal scale used when placing frequencies on a display axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrequencyScale {
    Linear,
    Mel,
}

/// One entry of the note-aligned feature vector
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoteBand {
    /// Position in the band vector, 0-based
    pub index: usize,

    /// MIDI note number the band is centred on
    pub note: u8,

    /// Aggregated spectrum magnitude inside the band window
    pub magnitude: f32,
}

/// Magnitude spectrum of one analysis window
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSpectrum {
    /// Non-negative magnitude per FFT bin, DC first
    pub magnitudes: Vec<f32>,

    /// Width of one bin in Hz (sample_rate / transform_length)
    pub base_frequency: f64,
}

impl PowerSpectrum {
    /// Map this spectrum onto note bands
    pub fn bands(
        &self,
        note_range: NoteRange,
        band_size: f64,
        aggregation: BandAggregation,
    ) -> Vec<NoteBand> {
        map_spectrum_to_bands(
            &self.magnitudes,
            self.base_frequency,
            note_range,
            band_size,
            aggregation,
        )
    }
}

/// Fundamental frequency of a (possibly fractional) MIDI note number
pub fn note_to_frequency(note: f64) -> f64 {
    A4_FREQUENCY * 2f64.powf((note - A4_NOTE) / 12.0)
}

/// Fractional MIDI note number of a frequency
pub fn frequency_to_note(frequency: f64) -> f64 {
    A4_NOTE + 12.0 * (frequency / A4_FREQUENCY).log2()
}

/// Map a spectrum to one magnitude per note in `note_range`.
///
/// Each note's window spans `band_size` semitones centred on the note,
/// i.e. the frequencies of `note - band_size / 2` and `note + band_size / 2`.
/// Bins inside the window are combined with `aggregation`. A window narrower
/// than one bin reads the bin nearest the note's fundamental. Notes whose
/// window lies past the last bin get a magnitude of zero, so the output always
/// has exactly `note_range.len()` entries in ascending note order.
pub fn map_spectrum_to_bands(
    spectrum: &[f32],
    base_frequency_hz: f64,
    note_range: NoteRange,
    band_size: f64,
    aggregation: BandAggregation,
) -> Vec<NoteBand> {
    let half_band = band_size / 2.0;

    note_range
        .iter()
        .enumerate()
        .map(|(index, note)| {
            let center = note as f64;
            let magnitude = match window_bins(
                spectrum.len(),
                base_frequency_hz,
                note_to_frequency(center - half_band),
                note_to_frequency(center + half_band),
                note_to_frequency(center),
            ) {
                Some((start, end)) => aggregate(&spectrum[start..end], aggregation),
                None => 0.0,
            };

            NoteBand {
                index,
                note,
                magnitude,
            }
        })
        .collect()
}

/// Bin range `[start, end)` covered by a frequency window, clipped to the spectrum
fn window_bins(
    bin_count: usize,
    base_frequency_hz: f64,
    lower_hz: f64,
    upper_hz: f64,
    center_hz: f64,
) -> Option<(usize, usize)> {
    if bin_count == 0 || !(base_frequency_hz > 0.0) {
        return None;
    }

    // Float-to-usize casts saturate, so negative bins clamp to 0
    let mut start = (lower_hz / base_frequency_hz).round() as usize;
    let mut end = (upper_hz / base_frequency_hz).round() as usize;

    if end <= start {
        start = (center_hz / base_frequency_hz).round() as usize;
        end = start.saturating_add(1);
    }

    let end = end.min(bin_count);
    if start >= end {
        return None;
    }

    Some((start, end))
}

fn aggregate(bins: &[f32], aggregation: BandAggregation) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }

    match aggregation {
        BandAggregation::Sum => bins.iter().sum(),
        BandAggregation::Mean => bins.iter().sum::<f32>() / bins.len() as f32,
        BandAggregation::Max => bins.iter().copied().fold(0.0, f32::max),
    }
}

/// Dense 1-based class index of `note` within `note_range`
pub fn note_label(note_range: NoteRange, note: u8) -> Result<u32, BandError> {
    if !note_range.contains(note) {
        return Err(BandError::NoteOutOfRange {
            note,
            start: note_range.start,
            end: note_range.end,
        });
    }
    Ok((note - note_range.start) as u32 + 1)
}

/// Note number represented by the band at `band`
pub fn note_for_band(note_range: NoteRange, band: usize) -> Option<u8> {
    if band >= note_range.len() {
        return None;
    }
    Some(note_range.start + band as u8)
}

/// Mel value of a frequency
pub fn hz_to_mel(frequency: f64) -> f64 {
    2595.0 * (1.0 + frequency / 700.0).log10()
}

/// Horizontal position of `frequency` on an axis of width `extent`.
///
/// High frequencies sit on the left: `min_frequency` maps to `extent` and
/// `max_frequency` to 0. Anything below `min_frequency` pins to `extent` while
/// anything at or above `max_frequency` pins to 0.
pub fn frequency_to_display_x(
    frequency: f64,
    min_frequency: f64,
    max_frequency: f64,
    scale: FrequencyScale,
    extent: f64,
) -> f64 {
    if frequency < min_frequency {
        return extent;
    }
    if frequency >= max_frequency {
        return 0.0;
    }

    let fraction = match scale {
        FrequencyScale::Linear => {
            (frequency - min_frequency) / (max_frequency - min_frequency)
        }
        FrequencyScale::Mel => {
            let min_mel = hz_to_mel(min_frequency);
            let max_mel = hz_to_mel(max_frequency);
            (hz_to_mel(frequency) - min_mel) / (max_mel - min_mel)
        }
    };

    extent * (1.0 - fraction)
}
