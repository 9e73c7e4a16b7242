//! Cleanup of raw pitch-tracker output
//!
//! Three passes run before key estimation and note segmentation:
//! confidence gating, a median filter over the voiced contour, and octave
//! jump correction against nearby voiced frames.

use crate::models::PitchFrame;
use stemscribe_common::config::TranscriptionConfig;
use stemscribe_common::music::midi_to_frequency;

/// Voiced neighbours are searched this many frames back
const OCTAVE_LOOKBEHIND: usize = 5;
/// and this many frames forward
const OCTAVE_LOOKAHEAD: usize = 4;

#[derive(Debug, Clone)]
pub struct PitchCleaner {
    confidence_threshold: f64,
    median_filter_size: usize,
    octave_jump_threshold: f64,
}

impl Default for PitchCleaner {
    fn default() -> Self {
        Self::new(&TranscriptionConfig::default())
    }
}

impl PitchCleaner {
    pub fn new(config: &TranscriptionConfig) -> Self {
        Self {
            confidence_threshold: config.confidence_threshold,
            median_filter_size: config.median_filter_size,
            octave_jump_threshold: config.octave_jump_threshold,
        }
    }

    pub fn clean(&self, frames: &[PitchFrame]) -> Vec<PitchFrame> {
        let mut frames = self.gate_confidence(frames);
        self.median_filter(&mut frames);
        let corrections = self.correct_octaves(&mut frames);

        let voiced = frames.iter().filter(|f| f.is_voiced()).count();
        tracing::info!(
            frames = frames.len(),
            voiced,
            octave_corrections = corrections,
            "Cleaned pitch contour"
        );
        frames
    }

    /// Frames below the threshold become unvoiced but keep their confidence
    fn gate_confidence(&self, frames: &[PitchFrame]) -> Vec<PitchFrame> {
        frames
            .iter()
            .map(|f| {
                if f.confidence < self.confidence_threshold {
                    PitchFrame::unvoiced(f.time, f.confidence)
                } else {
                    *f
                }
            })
            .collect()
    }

    /// Median filter over the voiced MIDI values only, edges repeat the nearest value
    fn median_filter(&self, frames: &mut [PitchFrame]) {
        let size = self.median_filter_size;
        if size < 2 || frames.len() < size {
            return;
        }

        let voiced: Vec<usize> = (0..frames.len())
            .filter(|&i| frames[i].midi_pitch > 0.0)
            .collect();
        if voiced.len() < size {
            return;
        }

        let values: Vec<f64> = voiced.iter().map(|&i| frames[i].midi_pitch).collect();
        let filtered = median_filter_nearest(&values, size);

        for (&idx, &midi) in voiced.iter().zip(filtered.iter()) {
            frames[idx].midi_pitch = midi;
            frames[idx].frequency = midi_to_frequency(midi);
        }
    }

    /// Shift interior frames that sit an octave (or more) away from their neighbours
    fn correct_octaves(&self, frames: &mut [PitchFrame]) -> usize {
        let mut corrections = 0;
        if frames.len() < 3 {
            return corrections;
        }

        for i in 1..frames.len() - 1 {
            if !frames[i].is_voiced() {
                continue;
            }

            let lower = i.saturating_sub(OCTAVE_LOOKBEHIND);
            let prev = (lower..i).rev().find(|&j| frames[j].is_voiced());
            let upper = (i + OCTAVE_LOOKAHEAD + 1).min(frames.len());
            let next = (i + 1..upper).find(|&j| frames[j].is_voiced());

            let (Some(prev), Some(next)) = (prev, next) else {
                continue;
            };

            let current = frames[i].midi_pitch;
            let expected = (frames[prev].midi_pitch + frames[next].midi_pitch) / 2.0;
            if (current - expected).abs() <= self.octave_jump_threshold {
                continue;
            }

            let shift = ((expected - current) / 12.0).round() * 12.0;
            if shift != 0.0 {
                frames[i].midi_pitch = current + shift;
                frames[i].frequency = midi_to_frequency(frames[i].midi_pitch);
                corrections += 1;
            }
        }

        if corrections > 0 {
            tracing::debug!(corrections, "Corrected octave errors");
        }
        corrections
    }
}

/// Sliding median with edges extended by the nearest sample
///
/// Even window sizes take the upper median.
fn median_filter_nearest(values: &[f64], size: usize) -> Vec<f64> {
    let n = values.len() as isize;
    let left = (size / 2) as isize;
    let mut window = Vec::with_capacity(size);

    (0..n)
        .map(|i| {
            window.clear();
            for k in 0..size as isize {
                let j = (i - left + k).clamp(0, n - 1);
                window.push(values[j as usize]);
            }
            window.sort_by(|a, b| a.total_cmp(b));
            window[size / 2]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use stemscribe_common::music::frequency_to_midi;

    fn frame(time: f64, midi: f64, confidence: f64) -> PitchFrame {
        PitchFrame::new(time, midi_to_frequency(midi), confidence)
    }

    fn cleaner() -> PitchCleaner {
        PitchCleaner::new(&TranscriptionConfig::default())
    }

    #[test]
    fn test_low_confidence_becomes_unvoiced() {
        let frames = vec![frame(0.0, 60.0, 0.9), frame(0.01, 60.0, 0.3)];
        let cleaned = cleaner().gate_confidence(&frames);

        assert!(cleaned[0].is_voiced());
        assert!(!cleaned[1].is_voiced());
        assert_eq!(cleaned[1].frequency, 0.0);
        assert_eq!(cleaned[1].midi_pitch, 0.0);
        assert_eq!(cleaned[1].confidence, 0.3);
    }

    #[test]
    fn test_median_filter_removes_spike() {
        let values = [60.0, 60.0, 61.0, 67.0, 60.0, 60.0, 60.0];
        let filtered = median_filter_nearest(&values, 5);
        assert_eq!(filtered[3], 60.0);
        assert_eq!(filtered[0], 60.0);
        assert_eq!(filtered.len(), values.len());
    }

    #[test]
    fn test_median_filter_skips_unvoiced_frames() {
        let mut frames: Vec<PitchFrame> = (0..8).map(|i| frame(i as f64 * 0.01, 62.0, 0.9)).collect();
        frames[2] = PitchFrame::unvoiced(0.02, 0.1);
        frames[5] = frame(0.05, 70.0, 0.9);

        let cleaned = cleaner().clean(&frames);
        assert!(!cleaned[2].is_voiced());
        assert!((cleaned[5].midi_pitch - 62.0).abs() < 1e-6);
        assert!((frequency_to_midi(cleaned[5].frequency) - 62.0).abs() < 1e-6);
    }

    #[test]
    fn test_too_few_voiced_frames_left_alone() {
        let frames = vec![
            frame(0.0, 60.0, 0.9),
            frame(0.01, 65.0, 0.9),
            frame(0.02, 60.0, 0.9),
        ];
        let mut copy = frames.clone();
        cleaner().median_filter(&mut copy);
        assert_eq!(copy, frames);
    }

    #[test]
    fn test_octave_error_shifted_toward_neighbours() {
        let mut frames = vec![
            frame(0.0, 57.0, 0.9),
            frame(0.01, 69.0, 0.9),
            frame(0.02, 57.0, 0.9),
        ];
        let corrections = cleaner().correct_octaves(&mut frames);
        assert_eq!(corrections, 1);
        assert!((frames[1].midi_pitch - 57.0).abs() < 1e-6);
        assert!((frames[1].frequency - 220.0).abs() < 1e-6);
    }

    #[test]
    fn test_octave_correction_needs_both_neighbours() {
        let mut frames = vec![
            PitchFrame::unvoiced(0.0, 0.0),
            frame(0.01, 81.0, 0.9),
            frame(0.02, 57.0, 0.9),
        ];
        assert_eq!(cleaner().correct_octaves(&mut frames), 0);
        assert!((frames[1].midi_pitch - 81.0).abs() < 1e-6);
    }

    #[test]
    fn test_small_deviation_untouched() {
        let mut frames = vec![
            frame(0.0, 60.0, 0.9),
            frame(0.01, 67.0, 0.9),
            frame(0.02, 60.0, 0.9),
        ];
        assert_eq!(cleaner().correct_octaves(&mut frames), 0);
    }
}
