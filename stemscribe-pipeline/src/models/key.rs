//! Key and scale estimate

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tonic and scale estimated from the vocal line
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub tonic_midi: u8,
    pub tonic_frequency: f64,
    pub tonic_name: String,
    pub scale_type: String,
    /// Semitone offsets from the tonic
    pub scale_intervals: Vec<u8>,
    /// Histogram mass at the tonic pitch class
    pub confidence: f64,
    /// Pitch-class names carrying noticeable mass
    pub detected_notes: Vec<String>,
    /// Histogram mass per scale degree, keyed by swara name
    pub degree_usage: BTreeMap<String, f64>,
}

impl Default for KeyInfo {
    /// C major, zero confidence
    fn default() -> Self {
        Self {
            tonic_midi: 60,
            tonic_frequency: 261.63,
            tonic_name: "C".to_string(),
            scale_type: "major".to_string(),
            scale_intervals: vec![0, 2, 4, 5, 7, 9, 11],
            confidence: 0.0,
            detected_notes: Vec::new(),
            degree_usage: BTreeMap::new(),
        }
    }
}

impl KeyInfo {
    /// Minor-flavoured scales get a minor key signature in MIDI export
    pub fn is_minor(&self) -> bool {
        self.scale_type.contains("minor")
            || matches!(self.scale_type.as_str(), "kafi" | "asavari" | "bhairavi")
    }
}
