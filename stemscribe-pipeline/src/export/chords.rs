//! Chord progression exports (JSON, LAB, CSV)

use super::write_file;
use crate::error::PipelineResult;
use crate::models::{ChordEvent, ChordProgression, KeyInfo};
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

pub const CHORDS_CSV_HEADER: &str = "start_time,end_time,duration,chord_label,confidence,root,quality,bass";

#[derive(Debug, Serialize)]
struct ChordsDocument<'a> {
    duration: f64,
    sample_rate: u32,
    tempo_bpm: f64,
    key_info: Option<&'a KeyInfo>,
    num_chords: usize,
    chords: Vec<ChordEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct ChordEntry<'a> {
    start_time: f64,
    end_time: f64,
    duration: f64,
    chord_label: &'a str,
    confidence: f64,
    root: &'a str,
    quality: &'a str,
    bass: &'a str,
}

impl<'a> From<&'a ChordEvent> for ChordEntry<'a> {
    fn from(event: &'a ChordEvent) -> Self {
        Self {
            start_time: event.start_time,
            end_time: event.end_time,
            duration: event.duration(),
            chord_label: &event.label,
            confidence: event.confidence,
            root: &event.root,
            quality: &event.quality,
            bass: &event.bass,
        }
    }
}

pub fn render_chords_json(progression: &ChordProgression) -> PipelineResult<String> {
    let document = ChordsDocument {
        duration: progression.duration,
        sample_rate: progression.sample_rate,
        tempo_bpm: progression.tempo_bpm,
        key_info: progression.key_info.as_ref(),
        num_chords: progression.events.len(),
        chords: progression.events.iter().map(ChordEntry::from).collect(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

/// One `start\tend\tlabel` line per event
pub fn render_chords_lab(progression: &ChordProgression) -> String {
    let mut out = String::new();
    for event in &progression.events {
        let _ = writeln!(out, "{:.6}\t{:.6}\t{}", event.start_time, event.end_time, event.label);
    }
    out
}

pub fn render_chords_csv(progression: &ChordProgression) -> String {
    let mut out = String::from(CHORDS_CSV_HEADER);
    out.push('\n');
    for event in &progression.events {
        let _ = writeln!(
            out,
            "{:.6},{:.6},{:.6},{},{:.4},{},{},{}",
            event.start_time,
            event.end_time,
            event.duration(),
            event.label,
            event.confidence,
            event.root,
            event.quality,
            event.bass
        );
    }
    out
}

pub fn export_chords_json(progression: &ChordProgression, path: &Path) -> PipelineResult<()> {
    write_file(path, render_chords_json(progression)?)?;
    tracing::info!(chords = progression.events.len(), path = %path.display(), "Exported chords JSON");
    Ok(())
}

pub fn export_chords_lab(progression: &ChordProgression, path: &Path) -> PipelineResult<()> {
    write_file(path, render_chords_lab(progression))?;
    tracing::info!(chords = progression.events.len(), path = %path.display(), "Exported chords LAB");
    Ok(())
}

pub fn export_chords_csv(progression: &ChordProgression, path: &Path) -> PipelineResult<()> {
    write_file(path, render_chords_csv(progression))?;
    tracing::info!(chords = progression.events.len(), path = %path.display(), "Exported chords CSV");
    Ok(())
}
