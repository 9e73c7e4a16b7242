//! Data models for the stemscribe pipeline

pub mod audio;
pub mod chord;
pub mod job;
pub mod key;
pub mod pitch;

pub use audio::{plan_chunks, AudioBuffer, ChunkBounds, MonoBuffer, StemSet};
pub use chord::{ChordEvent, ChordLabel, ChordProgression, RawChordFrame, NO_CHORD, UNKNOWN_CHORD};
pub use job::{Job, JobFiles, JobMetadata, JobStatus, Stage};
pub use key::KeyInfo;
pub use pitch::{NoteEvent, PitchFrame, RawPitchFrame};
