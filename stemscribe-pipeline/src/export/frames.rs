//! Processed pitch frame exports (JSON, CSV)

use super::write_file;
use crate::error::PipelineResult;
use crate::models::PitchFrame;
use serde::Serialize;
use std::fmt::Write as _;
use std::path::Path;

pub const PITCH_CSV_HEADER: &str = "time,frequency,midi_pitch,confidence,voiced";

/// Provenance stored alongside the frames
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FramesMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_song_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vocal_file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bpm: Option<f64>,
}

#[derive(Serialize)]
struct FramesDocument<'a> {
    metadata: &'a FramesMetadata,
    processed_frames: Vec<FrameEntry>,
    frame_count: usize,
}

#[derive(Serialize)]
struct FrameEntry {
    time: f64,
    frequency: f64,
    confidence: f64,
    midi_pitch: f64,
    is_voiced: bool,
}

pub fn render_frames_json(frames: &[PitchFrame], metadata: &FramesMetadata) -> PipelineResult<String> {
    let document = FramesDocument {
        metadata,
        processed_frames: frames
            .iter()
            .map(|f| FrameEntry {
                time: f.time,
                frequency: f.frequency,
                confidence: f.confidence,
                midi_pitch: f.midi_pitch,
                is_voiced: f.is_voiced(),
            })
            .collect(),
        frame_count: frames.len(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
}

pub fn render_pitch_csv(frames: &[PitchFrame]) -> String {
    let mut out = String::from(PITCH_CSV_HEADER);
    out.push('\n');
    for f in frames {
        let _ = writeln!(
            out,
            "{:.4},{:.2},{:.2},{:.4},{}",
            f.time,
            f.frequency,
            f.midi_pitch,
            f.confidence,
            u8::from(f.is_voiced())
        );
    }
    out
}

pub fn export_frames_json(frames: &[PitchFrame], metadata: &FramesMetadata, path: &Path) -> PipelineResult<()> {
    write_file(path, render_frames_json(frames, metadata)?)?;
    tracing::info!(frames = frames.len(), path = %path.display(), "Exported processed frames");
    Ok(())
}

pub fn export_pitch_csv(frames: &[PitchFrame], path: &Path) -> PipelineResult<()> {
    write_file(path, render_pitch_csv(frames))?;
    tracing::debug!(frames = frames.len(), path = %path.display(), "Exported pitch CSV");
    Ok(())
}
