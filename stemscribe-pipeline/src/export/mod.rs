//! Result file exporters
//!
//! `render_*` functions build file contents in memory; `export_*` functions
//! write them, creating parent directories as needed.

pub mod chords;
pub mod frames;
pub mod midi;
pub mod notes;

pub use chords::{export_chords_csv, export_chords_json, export_chords_lab};
pub use frames::{export_frames_json, export_pitch_csv, FramesMetadata};
pub use midi::{export_midi, MidiSettings};
pub use notes::{export_notes_json, NotesDocument};

use crate::error::{PipelineError, PipelineResult};
use std::path::Path;

/// Write `contents` to `path`, creating missing parent directories
pub fn write_file(path: &Path, contents: impl AsRef<[u8]>) -> PipelineResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| PipelineError::Export(format!("Failed to create {}: {}", parent.display(), e)))?;
    }
    std::fs::write(path, contents)
        .map_err(|e| PipelineError::Export(format!("Failed to write {}: {}", path.display(), e)))
}
