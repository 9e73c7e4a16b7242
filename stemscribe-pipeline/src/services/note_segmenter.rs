//! Note segmentation of a cleaned pitch contour
//!
//! Voiced runs become notes, short notes are folded into their predecessor,
//! and notes are split again wherever the contour jumps by more than the
//! configured threshold.

use crate::models::{NoteEvent, PitchFrame};
use stemscribe_common::config::TranscriptionConfig;

/// Lowest MIDI pitch covered by the anchor histogram
const ANCHOR_HISTOGRAM_LOW: f64 = 30.0;
/// Histogram bin width in semitones
const ANCHOR_BIN_WIDTH: f64 = 0.5;
/// Bins over [30, 90)
const ANCHOR_BINS: usize = 120;

/// Segments pitch frames into notes
#[derive(Debug, Clone, Default)]
pub struct NoteSegmenter {
    config: TranscriptionConfig,
}

impl NoteSegmenter {
    pub fn new(config: TranscriptionConfig) -> Self {
        Self { config }
    }

    pub fn segment(&self, frames: &[PitchFrame]) -> Vec<NoteEvent> {
        if frames.is_empty() {
            return Vec::new();
        }

        let segments = self.voiced_segments(frames);
        let notes: Vec<NoteEvent> = segments
            .into_iter()
            .map(|segment| self.note_from_frames(segment, self.config.default_velocity))
            .collect();
        let notes = self.merge_short_notes(notes);
        let mut notes: Vec<NoteEvent> = notes
            .into_iter()
            .flat_map(|note| self.split_on_pitch_jumps(note))
            .collect();

        for i in 1..notes.len() {
            let next_start = notes[i].start_time;
            let prev = &mut notes[i - 1];
            if prev.end_time > next_start {
                prev.end_time = next_start;
            }
        }
        notes.retain(|n| n.end_time > n.start_time);

        tracing::info!(frames = frames.len(), notes = notes.len(), "Segmented notes");
        notes
    }

    /// Runs of voiced frames, broken by unvoiced frames or long gaps
    fn voiced_segments(&self, frames: &[PitchFrame]) -> Vec<Vec<PitchFrame>> {
        let max_gap = self.gap_threshold() + self.config.hop_seconds();
        let mut segments = Vec::new();
        let mut current: Vec<PitchFrame> = Vec::new();

        for frame in frames {
            if frame.is_voiced() {
                if let Some(last) = current.last() {
                    if frame.time - last.time > max_gap {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                current.push(*frame);
            } else if !current.is_empty() {
                segments.push(std::mem::take(&mut current));
            }
        }

        if !current.is_empty() {
            segments.push(current);
        }
        segments
    }

    fn note_from_frames(&self, frames: Vec<PitchFrame>, velocity: u8) -> NoteEvent {
        let start_time = frames.first().map(|f| f.time).unwrap_or(0.0);
        let end_time = frames.last().map(|f| f.time).unwrap_or(start_time) + self.config.hop_seconds();
        let midi: Vec<f64> = frames.iter().map(|f| f.midi_pitch).collect();

        NoteEvent {
            start_time,
            end_time,
            anchor_midi: anchor_pitch(&midi),
            velocity: velocity.clamp(1, 127),
            frames,
        }
    }

    /// Fold notes shorter than the minimum into the preceding note when close enough
    fn merge_short_notes(&self, notes: Vec<NoteEvent>) -> Vec<NoteEvent> {
        if notes.len() < 2 {
            return notes;
        }

        let min_duration = self.config.min_note_duration_ms as f64 / 1000.0;
        let gap_threshold = self.gap_threshold();
        let mut merged: Vec<NoteEvent> = Vec::with_capacity(notes.len());

        for note in notes {
            if note.duration() < min_duration {
                if let Some(prev) = merged.last_mut() {
                    if note.start_time - prev.end_time < gap_threshold {
                        prev.end_time = note.end_time;
                        prev.frames.extend(note.frames);
                        continue;
                    }
                }
            }
            merged.push(note);
        }

        merged
    }

    fn split_on_pitch_jumps(&self, note: NoteEvent) -> Vec<NoteEvent> {
        if note.frames.len() < 3 {
            return vec![note];
        }

        let threshold = self.config.pitch_jump_threshold;
        let mut boundaries = vec![0];
        for i in 1..note.frames.len() {
            let jump = (note.frames[i].midi_pitch - note.frames[i - 1].midi_pitch).abs();
            if jump > threshold {
                boundaries.push(i);
            }
        }

        if boundaries.len() == 1 {
            return vec![note];
        }
        boundaries.push(note.frames.len());

        boundaries
            .windows(2)
            .map(|w| self.note_from_frames(note.frames[w[0]..w[1]].to_vec(), note.velocity))
            .collect()
    }

    fn gap_threshold(&self) -> f64 {
        self.config.note_gap_threshold_ms as f64 / 1000.0
    }
}

/// Integer pitch a run of frames is anchored to
///
/// Modal 0.5-semitone bin over [30, 90), rounded to the nearest semitone;
/// the lowest bin wins ties. Contours entirely outside the histogram range
/// fall back to their rounded mean.
pub fn anchor_pitch(midi_values: &[f64]) -> u8 {
    if midi_values.is_empty() {
        return 60;
    }

    let mut hist = [0usize; ANCHOR_BINS];
    for &m in midi_values {
        let offset = (m - ANCHOR_HISTOGRAM_LOW) / ANCHOR_BIN_WIDTH;
        if offset >= 0.0 && (offset as usize) < ANCHOR_BINS {
            hist[offset as usize] += 1;
        }
    }

    let mut best_bin = None;
    let mut best_count = 0;
    for (i, &count) in hist.iter().enumerate() {
        if count > best_count {
            best_count = count;
            best_bin = Some(i);
        }
    }

    let pitch = match best_bin {
        Some(i) => ANCHOR_HISTOGRAM_LOW + ANCHOR_BIN_WIDTH * i as f64 + ANCHOR_BIN_WIDTH / 2.0,
        None => midi_values.iter().sum::<f64>() / midi_values.len() as f64,
    };
    pitch.round().clamp(0.0, 127.0) as u8
}
