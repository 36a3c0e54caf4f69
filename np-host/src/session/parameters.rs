//! Conversion parameters and presets

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// Allowed range for onset and frame thresholds
pub const THRESHOLD_RANGE: RangeInclusive<f64> = 0.1..=0.9;

/// Engine default onset threshold
pub const DEFAULT_ONSET_THRESHOLD: f64 = 0.5;
/// Engine default frame threshold
pub const DEFAULT_FRAME_THRESHOLD: f64 = 0.3;
/// Engine default minimum note length in milliseconds
pub const DEFAULT_MIN_NOTE_LENGTH_MS: f64 = 58.0;
/// Tempo value meaning "let the engine detect it"
pub const AUTO_TEMPO: f64 = 0.0;

/// Immutable parameter snapshot sent with one conversion request
///
/// Build new snapshots with [`ConversionParameters::apply`] or
/// [`ConversionParameters::with_tempo`]; every constructor clamps values into
/// their valid ranges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionParameters {
    /// Note onset sensitivity (0.1 - 0.9)
    pub onset_threshold: f64,
    /// Note frame sensitivity (0.1 - 0.9)
    pub frame_threshold: f64,
    /// Shortest note kept, in milliseconds
    pub min_note_length_ms: f64,
    /// Tempo in BPM; 0 requests auto-detection
    pub tempo_bpm: f64,
}

impl Default for ConversionParameters {
    fn default() -> Self {
        Self {
            onset_threshold: DEFAULT_ONSET_THRESHOLD,
            frame_threshold: DEFAULT_FRAME_THRESHOLD,
            min_note_length_ms: DEFAULT_MIN_NOTE_LENGTH_MS,
            tempo_bpm: AUTO_TEMPO,
        }
    }
}

impl ConversionParameters {
    pub fn new(onset_threshold: f64, frame_threshold: f64, min_note_length_ms: f64, tempo_bpm: f64) -> Self {
        Self {
            onset_threshold: clamp_threshold(onset_threshold, DEFAULT_ONSET_THRESHOLD),
            frame_threshold: clamp_threshold(frame_threshold, DEFAULT_FRAME_THRESHOLD),
            min_note_length_ms: clamp_non_negative(min_note_length_ms),
            tempo_bpm: normalize_tempo(tempo_bpm),
        }
    }

    /// Copy with a different tempo
    pub fn with_tempo(self, tempo_bpm: f64) -> Self {
        Self::new(
            self.onset_threshold,
            self.frame_threshold,
            self.min_note_length_ms,
            tempo_bpm,
        )
    }

    /// Copy with the fields present in `edit` replaced
    pub fn apply(self, edit: &ParameterEdit) -> Self {
        Self::new(
            edit.onset_threshold.unwrap_or(self.onset_threshold),
            edit.frame_threshold.unwrap_or(self.frame_threshold),
            edit.min_note_length_ms.unwrap_or(self.min_note_length_ms),
            edit.tempo_bpm.unwrap_or(self.tempo_bpm),
        )
    }

    pub fn is_auto_tempo(&self) -> bool {
        self.tempo_bpm <= AUTO_TEMPO
    }

    /// Tempo as sent in the `midi_tempo` form field
    ///
    /// The engine accepts whole BPM only.
    pub fn tempo_field(&self) -> i64 {
        self.tempo_bpm.round() as i64
    }
}

fn clamp_threshold(value: f64, fallback: f64) -> f64 {
    if value.is_nan() {
        return fallback;
    }
    value.clamp(*THRESHOLD_RANGE.start(), *THRESHOLD_RANGE.end())
}

/// Tempos that round to 0 BPM are sent as auto, so store them as auto
fn normalize_tempo(value: f64) -> f64 {
    let tempo = clamp_non_negative(value);
    if tempo.round() == AUTO_TEMPO {
        AUTO_TEMPO
    } else {
        tempo
    }
}

fn clamp_non_negative(value: f64) -> f64 {
    if value.is_nan() || value < 0.0 {
        0.0
    } else {
        value
    }
}

/// Partial parameter update from a slider or text field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterEdit {
    pub onset_threshold: Option<f64>,
    pub frame_threshold: Option<f64>,
    pub min_note_length_ms: Option<f64>,
    pub tempo_bpm: Option<f64>,
}

impl ParameterEdit {
    pub fn is_empty(&self) -> bool {
        self.onset_threshold.is_none()
            && self.frame_threshold.is_none()
            && self.min_note_length_ms.is_none()
            && self.tempo_bpm.is_none()
    }
}

/// Named parameter sets offered next to the sliders
///
/// Presets replace the detection thresholds and note length but keep the
/// current tempo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Engine defaults
    Balanced,
    /// Picks up quiet and short notes; noisier output
    Sensitive,
    /// Only confident, sustained notes
    Clean,
}

impl Preset {
    pub const ALL: [Preset; 3] = [Preset::Balanced, Preset::Sensitive, Preset::Clean];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Balanced => "balanced",
            Preset::Sensitive => "sensitive",
            Preset::Clean => "clean",
        }
    }

    pub fn edit(&self) -> ParameterEdit {
        let (onset, frame, min_note) = match self {
            Preset::Balanced => (
                DEFAULT_ONSET_THRESHOLD,
                DEFAULT_FRAME_THRESHOLD,
                DEFAULT_MIN_NOTE_LENGTH_MS,
            ),
            Preset::Sensitive => (0.3, 0.2, 35.0),
            Preset::Clean => (0.7, 0.5, 100.0),
        };
        ParameterEdit {
            onset_threshold: Some(onset),
            frame_threshold: Some(frame),
            min_note_length_ms: Some(min_note),
            tempo_bpm: None,
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Preset::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown preset '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_engine_defaults() {
        let p = ConversionParameters::default();
        assert_eq!(p.onset_threshold, 0.5);
        assert_eq!(p.frame_threshold, 0.3);
        assert_eq!(p.min_note_length_ms, 58.0);
        assert!(p.is_auto_tempo());
    }

    #[test]
    fn test_thresholds_are_clamped() {
        let p = ConversionParameters::new(0.0, 1.5, -3.0, -10.0);
        assert_eq!(p.onset_threshold, 0.1);
        assert_eq!(p.frame_threshold, 0.9);
        assert_eq!(p.min_note_length_ms, 0.0);
        assert_eq!(p.tempo_bpm, 0.0);
    }

    #[test]
    fn test_nan_threshold_falls_back_to_default() {
        let p = ConversionParameters::new(f64::NAN, 0.4, 58.0, 0.0);
        assert_eq!(p.onset_threshold, DEFAULT_ONSET_THRESHOLD);
    }

    #[test]
    fn test_apply_only_touches_present_fields() {
        let base = ConversionParameters::default().with_tempo(96.0);
        let edited = base.apply(&ParameterEdit {
            frame_threshold: Some(0.6),
            ..Default::default()
        });
        assert_eq!(edited.frame_threshold, 0.6);
        assert_eq!(edited.onset_threshold, base.onset_threshold);
        assert_eq!(edited.tempo_bpm, 96.0);
    }

    #[test]
    fn test_preset_keeps_tempo() {
        let base = ConversionParameters::default().with_tempo(140.0);
        let clean = base.apply(&Preset::Clean.edit());
        assert_eq!(clean.onset_threshold, 0.7);
        assert_eq!(clean.tempo_bpm, 140.0);
    }

    #[test]
    fn test_preset_parsing() {
        assert_eq!("Sensitive".parse::<Preset>().unwrap(), Preset::Sensitive);
        assert!("loud".parse::<Preset>().is_err());
    }

    #[test]
    fn test_tempo_field_rounds() {
        assert_eq!(ConversionParameters::default().with_tempo(119.6).tempo_field(), 120);
        assert_eq!(ConversionParameters::default().tempo_field(), 0);
    }

    #[test]
    fn test_tempo_below_one_bpm_is_auto() {
        let p = ConversionParameters::default().with_tempo(0.4);
        assert!(p.is_auto_tempo());
        assert_eq!(p.tempo_bpm, AUTO_TEMPO);
        assert_eq!(p.tempo_field(), 0);

        let p = ConversionParameters::default().with_tempo(0.5);
        assert!(!p.is_auto_tempo());
        assert_eq!(p.tempo_field(), 1);
    }
}
