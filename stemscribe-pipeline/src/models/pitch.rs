//! Pitch frames and note events

use serde::{Deserialize, Serialize};
use stemscribe_common::music::frequency_to_midi;

/// One pitch-tracker frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PitchFrame {
    /// Seconds from start of audio
    pub time: f64,
    /// Hz; 0 means unvoiced
    pub frequency: f64,
    /// Voicing confidence 0-1
    pub confidence: f64,
    /// Fractional MIDI pitch derived from frequency; 0 when unvoiced
    pub midi_pitch: f64,
}

impl PitchFrame {
    pub fn new(time: f64, frequency: f64, confidence: f64) -> Self {
        let frequency = frequency.max(0.0);
        Self {
            time,
            frequency,
            confidence: confidence.clamp(0.0, 1.0),
            midi_pitch: frequency_to_midi(frequency),
        }
    }

    /// Unvoiced frame that keeps its confidence
    pub fn unvoiced(time: f64, confidence: f64) -> Self {
        Self::new(time, 0.0, confidence)
    }

    pub fn is_voiced(&self) -> bool {
        self.frequency > 0.0 && self.confidence > 0.0
    }
}

/// Pitch frame as emitted by a pitch model
///
/// `midi_pitch` is always recomputed from the frequency.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawPitchFrame {
    pub time: f64,
    pub frequency: f64,
    pub confidence: f64,
}

impl From<RawPitchFrame> for PitchFrame {
    fn from(raw: RawPitchFrame) -> Self {
        PitchFrame::new(raw.time, raw.frequency, raw.confidence)
    }
}

/// A discrete note built from contiguous voiced frames
#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub start_time: f64,
    pub end_time: f64,
    /// Integer MIDI pitch the note is anchored to
    pub anchor_midi: u8,
    /// 1-127
    pub velocity: u8,
    /// Contributing frames, time ordered
    pub frames: Vec<PitchFrame>,
}

impl NoteEvent {
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_midi_pitch_derived() {
        let frame = PitchFrame::new(0.0, 440.0, 0.9);
        assert!((frame.midi_pitch - 69.0).abs() < 1e-9);
        assert!(frame.is_voiced());
    }

    #[test]
    fn test_unvoiced_frame() {
        let frame = PitchFrame::unvoiced(1.0, 0.4);
        assert_eq!(frame.midi_pitch, 0.0);
        assert_eq!(frame.confidence, 0.4);
        assert!(!frame.is_voiced());
    }

    #[test]
    fn test_zero_confidence_is_unvoiced() {
        assert!(!PitchFrame::new(0.0, 220.0, 0.0).is_voiced());
    }
}
