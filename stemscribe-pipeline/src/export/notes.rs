//! Note transcription export (JSON)

use super::write_file;
use crate::error::PipelineResult;
use crate::models::{KeyInfo, NoteEvent};
use serde::Serialize;
use std::path::Path;

/// Transcription summary written next to the MIDI file
#[derive(Debug, Serialize)]
pub struct NotesDocument<'a> {
    pub duration: f64,
    pub tempo_bpm: f64,
    pub sample_rate: u32,
    pub notes: Vec<NoteEntry>,
    pub key_info: &'a KeyInfo,
}

#[derive(Debug, Serialize)]
pub struct NoteEntry {
    pub start_time: f64,
    pub end_time: f64,
    pub anchor_midi: u8,
    pub velocity: u8,
    pub duration: f64,
}

impl<'a> NotesDocument<'a> {
    pub fn new(notes: &[NoteEvent], key_info: &'a KeyInfo, duration: f64, tempo_bpm: f64, sample_rate: u32) -> Self {
        Self {
            duration,
            tempo_bpm,
            sample_rate,
            notes: notes
                .iter()
                .map(|n| NoteEntry {
                    start_time: n.start_time,
                    end_time: n.end_time,
                    anchor_midi: n.anchor_midi,
                    velocity: n.velocity,
                    duration: n.duration(),
                })
                .collect(),
            key_info,
        }
    }
}

pub fn export_notes_json(document: &NotesDocument<'_>, path: &Path) -> PipelineResult<()> {
    write_file(path, serde_json::to_string_pretty(document)?)?;
    tracing::info!(notes = document.notes.len(), path = %path.display(), "Exported notes");
    Ok(())
}
