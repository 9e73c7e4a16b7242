//! Chord frames, labels, events and progressions

use crate::models::KeyInfo;
use serde::{Deserialize, Serialize};

/// No-chord label
pub const NO_CHORD: &str = "N";
/// Unknown-chord label
pub const UNKNOWN_CHORD: &str = "X";

/// One frame of chord-model output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChordFrame {
    pub time: f64,
    pub label: String,
    pub confidence: f64,
}

impl RawChordFrame {
    pub fn new(time: f64, label: impl Into<String>, confidence: f64) -> Self {
        Self {
            time,
            label: label.into(),
            confidence,
        }
    }
}

/// Decomposed chord label (`root[:quality][/bass]`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChordLabel {
    pub root: String,
    pub quality: String,
    pub bass: String,
}

impl ChordLabel {
    /// Split a label into root, quality and bass
    ///
    /// A plain root gets quality `maj`; bass defaults to the root.
    /// `N` and `X` keep the label as root with empty quality and bass.
    pub fn parse(label: &str) -> Self {
        let label = label.trim();
        if label.is_empty() || label == NO_CHORD || label == UNKNOWN_CHORD {
            return Self {
                root: label.to_string(),
                quality: String::new(),
                bass: String::new(),
            };
        }

        let (body, bass) = match label.split_once('/') {
            Some((body, bass)) => (body, Some(bass)),
            None => (label, None),
        };

        let (root, quality) = match body.split_once(':') {
            Some((root, quality)) if !quality.is_empty() => (root, quality),
            Some((root, _)) => (root, "maj"),
            None => (body, "maj"),
        };

        let bass = match bass {
            Some(b) if !b.is_empty() => b,
            _ => root,
        };

        Self {
            root: root.to_string(),
            quality: quality.to_string(),
            bass: bass.to_string(),
        }
    }
}

/// A chord held over a time span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    pub start_time: f64,
    pub end_time: f64,
    pub label: String,
    pub confidence: f64,
    pub root: String,
    pub quality: String,
    pub bass: String,
}

impl ChordEvent {
    pub fn new(start_time: f64, end_time: f64, label: impl Into<String>, confidence: f64) -> Self {
        let label = label.into();
        let parts = ChordLabel::parse(&label);
        Self {
            start_time,
            end_time,
            label,
            confidence,
            root: parts.root,
            quality: parts.quality,
            bass: parts.bass,
        }
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// Chord events for one song plus analysis metadata
#[derive(Debug, Clone, PartialEq)]
pub struct ChordProgression {
    pub events: Vec<ChordEvent>,
    pub duration: f64,
    pub sample_rate: u32,
    pub tempo_bpm: f64,
    pub key_info: Option<KeyInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_root() {
        let parsed = ChordLabel::parse("C");
        assert_eq!(parsed.root, "C");
        assert_eq!(parsed.quality, "maj");
        assert_eq!(parsed.bass, "C");
    }

    #[test]
    fn test_parse_quality_and_bass() {
        let parsed = ChordLabel::parse("F#:min7/A");
        assert_eq!(parsed.root, "F#");
        assert_eq!(parsed.quality, "min7");
        assert_eq!(parsed.bass, "A");
    }

    #[test]
    fn test_parse_quality_without_bass() {
        let parsed = ChordLabel::parse("Bb:min");
        assert_eq!(parsed.bass, "Bb");
    }

    #[test]
    fn test_parse_no_chord() {
        for label in ["N", "X"] {
            let parsed = ChordLabel::parse(label);
            assert_eq!(parsed.root, label);
            assert!(parsed.quality.is_empty());
            assert!(parsed.bass.is_empty());
        }
    }

    #[test]
    fn test_event_decomposes_label() {
        let event = ChordEvent::new(0.0, 2.0, "G:7", 0.8);
        assert_eq!(event.root, "G");
        assert_eq!(event.quality, "7");
        assert_eq!(event.duration(), 2.0);
    }
}
