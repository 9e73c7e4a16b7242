//! Chord event building from frame-level chord labels
//!
//! Passes, in order:
//! 1. Run-length encode frames into events
//! 2. Drop low-confidence events
//! 3. Smooth short interruptions between two equal chords
//! 4. Merge consecutive equal labels
//! 5. Drop events shorter than the minimum duration
//!
//! A dropped event's span goes to the preceding surviving event (or the
//! following one when nothing precedes it), so the output keeps covering the
//! analysed span without gaps.

use crate::models::{ChordEvent, RawChordFrame};
use stemscribe_common::config::ChordConfig;

/// Interior events shorter than this are smoothing candidates (seconds)
const SMOOTHING_MAX_DURATION: f64 = 0.2;

/// Frame spacing assumed when only one frame exists (hop 4410 at 22.05 kHz)
const FALLBACK_FRAME_SPACING: f64 = 0.2;

/// Post-processing options
#[derive(Debug, Clone, PartialEq)]
pub struct ChordBuilderConfig {
    /// Events shorter than this are absorbed by a neighbour
    pub min_chord_duration_ms: u32,
    pub smooth_chords: bool,
    /// Events below this confidence are absorbed; 0 disables the filter
    pub filter_low_confidence: f64,
}

impl Default for ChordBuilderConfig {
    fn default() -> Self {
        Self {
            min_chord_duration_ms: 100,
            smooth_chords: true,
            filter_low_confidence: 0.3,
        }
    }
}

impl From<&ChordConfig> for ChordBuilderConfig {
    fn from(config: &ChordConfig) -> Self {
        Self {
            min_chord_duration_ms: config.min_chord_duration_ms,
            smooth_chords: config.smooth_chords,
            filter_low_confidence: config.filter_low_confidence,
        }
    }
}

/// Turns raw chord frames into chord events
#[derive(Debug, Clone, Default)]
pub struct ChordEventBuilder {
    config: ChordBuilderConfig,
}

impl ChordEventBuilder {
    pub fn new(config: ChordBuilderConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, frames: &[RawChordFrame]) -> Vec<ChordEvent> {
        let mut events = run_length_encode(frames);
        let encoded = events.len();

        if self.config.filter_low_confidence > 0.0 {
            let threshold = self.config.filter_low_confidence;
            let keep: Vec<bool> = events.iter().map(|e| e.confidence >= threshold).collect();
            events = absorb_dropped(events, &keep);
        }

        if self.config.smooth_chords {
            events = smooth(events);
        }

        events = merge_consecutive(events);

        let min_duration = self.config.min_chord_duration_ms as f64 / 1000.0;
        let keep: Vec<bool> = events.iter().map(|e| e.duration() >= min_duration).collect();
        events = merge_consecutive(absorb_dropped(events, &keep));

        tracing::debug!(
            frames = frames.len(),
            encoded,
            events = events.len(),
            "Built chord events"
        );
        events
    }
}

/// Collapse runs of equal labels
///
/// Each event ends where the next label starts; the last one ends one frame
/// spacing after the final frame. Confidence is the mean over the run.
pub fn run_length_encode(frames: &[RawChordFrame]) -> Vec<ChordEvent> {
    let Some(first) = frames.first() else {
        return Vec::new();
    };

    let spacing = match frames.get(1) {
        Some(second) if second.time > first.time => second.time - first.time,
        _ => FALLBACK_FRAME_SPACING,
    };

    let mut events = Vec::new();
    let mut run_start = 0;

    for i in 1..=frames.len() {
        let run_ends = i == frames.len() || frames[i].label != frames[run_start].label;
        if !run_ends {
            continue;
        }

        let run = &frames[run_start..i];
        let end_time = match frames.get(i) {
            Some(next) => next.time,
            None => frames[i - 1].time + spacing,
        };
        let confidence = run.iter().map(|f| f.confidence).sum::<f64>() / run.len() as f64;
        let start_time = frames[run_start].time;

        if end_time > start_time {
            events.push(ChordEvent::new(
                start_time,
                end_time,
                frames[run_start].label.clone(),
                confidence,
            ));
        }
        run_start = i;
    }

    events
}

/// Drop short interior events sandwiched between two equal labels
///
/// Neighbours are taken from the input list, so consecutive candidates are
/// judged independently.
fn smooth(events: Vec<ChordEvent>) -> Vec<ChordEvent> {
    if events.len() < 3 {
        return events;
    }

    let keep: Vec<bool> = (0..events.len())
        .map(|i| {
            if i == 0 || i == events.len() - 1 {
                return true;
            }
            let (prev, curr, next) = (&events[i - 1], &events[i], &events[i + 1]);
            !(curr.duration() < SMOOTHING_MAX_DURATION
                && prev.label == next.label
                && curr.label != prev.label)
        })
        .collect();

    absorb_dropped(events, &keep)
}

/// Join consecutive events with the same label, keeping the higher confidence
pub fn merge_consecutive(events: Vec<ChordEvent>) -> Vec<ChordEvent> {
    let mut merged: Vec<ChordEvent> = Vec::with_capacity(events.len());

    for event in events {
        match merged.last_mut() {
            Some(last) if last.label == event.label => {
                last.end_time = event.end_time;
                last.confidence = last.confidence.max(event.confidence);
            }
            _ => merged.push(event),
        }
    }

    merged
}

/// Remove events whose `keep` flag is false, handing their spans to a neighbour
fn absorb_dropped(events: Vec<ChordEvent>, keep: &[bool]) -> Vec<ChordEvent> {
    let mut out: Vec<ChordEvent> = Vec::with_capacity(events.len());
    let mut head_start: Option<f64> = None;

    for (event, &kept) in events.into_iter().zip(keep) {
        if kept {
            let mut event = event;
            if out.is_empty() {
                if let Some(start) = head_start.take() {
                    event.start_time = start;
                }
            }
            out.push(event);
        } else if let Some(last) = out.last_mut() {
            last.end_time = event.end_time;
        } else {
            head_start.get_or_insert(event.start_time);
        }
    }

    out
}
