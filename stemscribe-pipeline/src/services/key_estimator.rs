//! Tonic and scale estimation from voiced pitch frames

use crate::models::{KeyInfo, PitchFrame};
use std::collections::BTreeMap;
use stemscribe_common::music::{midi_to_frequency, pitch_class, pitch_class_name};

/// Scale templates, scored in this order; the first best score wins
pub const SCALE_CATALOG: [(&str, [u8; 7]); 14] = [
    ("major", [0, 2, 4, 5, 7, 9, 11]),
    ("minor", [0, 2, 3, 5, 7, 8, 10]),
    ("harmonic_minor", [0, 2, 3, 5, 7, 8, 11]),
    ("melodic_minor", [0, 2, 3, 5, 7, 9, 11]),
    ("bilawal", [0, 2, 4, 5, 7, 9, 11]),
    ("kafi", [0, 2, 3, 5, 7, 9, 10]),
    ("bhairav", [0, 1, 4, 5, 7, 8, 11]),
    ("kalyan", [0, 2, 4, 6, 7, 9, 11]),
    ("khamaj", [0, 2, 4, 5, 7, 9, 10]),
    ("asavari", [0, 2, 3, 5, 7, 8, 10]),
    ("bhairavi", [0, 1, 3, 5, 7, 8, 10]),
    ("marwa", [0, 1, 4, 6, 7, 9, 11]),
    ("purvi", [0, 1, 4, 6, 7, 8, 11]),
    ("todi", [0, 1, 3, 6, 7, 8, 11]),
];

/// Scale degree names by semitone offset from the tonic
pub const SWARA_NAMES: [&str; 12] = [
    "Sa", "Re_k", "Re", "Ga_k", "Ga", "Ma", "Ma_t", "Pa", "Dha_k", "Dha", "Ni_k", "Ni",
];

/// Pitch classes above this share of the histogram count as detected
const DETECTED_NOTE_THRESHOLD: f64 = 0.05;

/// Estimates key and scale from a vocal pitch contour
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyEstimator;

impl KeyEstimator {
    pub fn new() -> Self {
        Self
    }

    pub fn estimate(&self, frames: &[PitchFrame]) -> KeyInfo {
        let voiced: Vec<&PitchFrame> = frames.iter().filter(|f| f.is_voiced()).collect();
        if voiced.is_empty() {
            tracing::info!("No voiced frames; using default key");
            return KeyInfo::default();
        }

        let histogram = pitch_class_histogram(&voiced);
        let tonic_midi = detect_tonic(&voiced);
        let tonic_class = pitch_class(tonic_midi);
        let (scale_type, scale_intervals) = best_scale(&histogram, tonic_class);

        let detected_notes = (0..12)
            .filter(|&pc| histogram[pc] > DETECTED_NOTE_THRESHOLD)
            .map(|pc| pitch_class_name(pc as i32).to_string())
            .collect();

        let degree_usage: BTreeMap<String, f64> = SWARA_NAMES
            .iter()
            .enumerate()
            .map(|(offset, name)| (name.to_string(), histogram[(tonic_class + offset) % 12]))
            .collect();

        let key = KeyInfo {
            tonic_midi: tonic_midi.clamp(0, 127) as u8,
            tonic_frequency: midi_to_frequency(tonic_midi as f64),
            tonic_name: pitch_class_name(tonic_midi).to_string(),
            scale_type: scale_type.to_string(),
            scale_intervals: scale_intervals.to_vec(),
            confidence: histogram[tonic_class],
            detected_notes,
            degree_usage,
        };

        tracing::info!(
            voiced_frames = voiced.len(),
            tonic = %key.tonic_name,
            scale = %key.scale_type,
            confidence = key.confidence,
            "Estimated key"
        );
        key
    }
}

/// Confidence-weighted pitch-class histogram normalised to sum 1
fn pitch_class_histogram(frames: &[&PitchFrame]) -> [f64; 12] {
    let mut histogram = [0.0; 12];
    for frame in frames {
        histogram[pitch_class(frame.midi_pitch.round() as i32)] += frame.confidence;
    }

    let total: f64 = histogram.iter().sum();
    if total > 0.0 {
        for bin in histogram.iter_mut() {
            *bin /= total;
        }
    }
    histogram
}

/// Most frequent rounded MIDI note's class, placed in that class's most frequent octave
///
/// Counts keep first-seen order so earlier notes win ties.
fn detect_tonic(frames: &[&PitchFrame]) -> i32 {
    let mut counts: Vec<(i32, usize)> = Vec::new();
    for frame in frames {
        let midi = frame.midi_pitch.round() as i32;
        match counts.iter_mut().find(|(m, _)| *m == midi) {
            Some((_, count)) => *count += 1,
            None => counts.push((midi, 1)),
        }
    }

    let Some(most_common) = first_max(counts.iter().copied()) else {
        return 60;
    };

    let class = pitch_class(most_common);
    first_max(counts.iter().copied().filter(|(m, _)| pitch_class(*m) == class)).unwrap_or(most_common)
}

fn first_max(counts: impl Iterator<Item = (i32, usize)>) -> Option<i32> {
    let mut best: Option<(i32, usize)> = None;
    for (midi, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((midi, count));
        }
    }
    best.map(|(midi, _)| midi)
}

fn best_scale(histogram: &[f64; 12], tonic_class: usize) -> (&'static str, [u8; 7]) {
    let mut best = SCALE_CATALOG[0];
    let mut best_score = 0.0;

    for (name, intervals) in SCALE_CATALOG {
        let score: f64 = intervals
            .iter()
            .map(|&i| histogram[(tonic_class + i as usize) % 12])
            .sum();
        if score > best_score {
            best_score = score;
            best = (name, intervals);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames_for(midis: &[f64]) -> Vec<PitchFrame> {
        midis
            .iter()
            .enumerate()
            .map(|(i, m)| PitchFrame::new(i as f64 * 0.01, midi_to_frequency(*m), 0.9))
            .collect()
    }

    #[test]
    fn test_no_voiced_frames_defaults() {
        let frames = vec![PitchFrame::unvoiced(0.0, 0.2), PitchFrame::unvoiced(0.01, 0.1)];
        assert_eq!(KeyEstimator::new().estimate(&frames), KeyInfo::default());
        assert_eq!(KeyEstimator::new().estimate(&[]), KeyInfo::default());
    }

    #[test]
    fn test_d_major_melody() {
        // D major scale with D dominant
        let mut midis = vec![62.0; 10];
        midis.extend([64.0, 66.0, 67.0, 69.0, 71.0, 73.0, 74.0, 69.0, 66.0]);
        let key = KeyEstimator::new().estimate(&frames_for(&midis));

        assert_eq!(key.tonic_midi, 62);
        assert_eq!(key.tonic_name, "D");
        assert_eq!(key.scale_type, "major");
        assert_eq!(key.scale_intervals, vec![0, 2, 4, 5, 7, 9, 11]);
        assert!((key.tonic_frequency - 293.66).abs() < 0.01);
        assert!(key.detected_notes.contains(&"F#".to_string()));
        assert!(!key.detected_notes.contains(&"F".to_string()));
        assert!((key.degree_usage["Sa"] - key.confidence).abs() < 1e-12);
        assert_eq!(key.degree_usage.len(), 12);
    }

    #[test]
    fn test_minor_third_prefers_minor() {
        let midis = [57.0, 57.0, 57.0, 57.0, 59.0, 60.0, 60.0, 62.0, 64.0, 65.0, 67.0];
        let key = KeyEstimator::new().estimate(&frames_for(&midis));
        assert_eq!(key.tonic_name, "A");
        assert_eq!(key.scale_type, "minor");
    }

    #[test]
    fn test_tonic_octave_is_most_frequent_of_class() {
        // 60 is the most common note and the most common C
        let midis = [60.0, 60.0, 60.0, 72.0, 72.0, 67.0];
        let key = KeyEstimator::new().estimate(&frames_for(&midis));
        assert_eq!(key.tonic_midi, 60);

        let midis = [72.0, 72.0, 60.0, 60.0, 67.0];
        let key = KeyEstimator::new().estimate(&frames_for(&midis));
        assert_eq!(key.tonic_midi, 72, "first seen wins ties");
    }

    #[test]
    fn test_histogram_normalised() {
        let frames = frames_for(&[60.0, 62.0, 64.0, 65.0]);
        let voiced: Vec<&PitchFrame> = frames.iter().collect();
        let histogram = pitch_class_histogram(&voiced);
        assert!((histogram.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!((histogram[0] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_is_deterministic() {
        let midis: Vec<f64> = (0..300).map(|i| 55.0 + ((i * 7) % 19) as f64).collect();
        let frames = frames_for(&midis);
        let estimator = KeyEstimator::new();
        assert_eq!(estimator.estimate(&frames), estimator.estimate(&frames));
    }
}
