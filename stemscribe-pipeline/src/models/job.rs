//! Job record and lifecycle states
//!
//! Queued → Processing (Separation → Transcription → Chords) → Completed | Failed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Admitted, waiting for a worker
    Queued,
    /// A worker is running the pipeline
    Processing,
    /// All stages finished
    Completed,
    /// A stage failed; remaining stages skipped
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Completed and Failed are final
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Source separation into stems
    Separation,
    /// Vocal pitch transcription
    Transcription,
    /// Chord recognition
    Chords,
}

impl Stage {
    /// Stages in execution order
    pub const ALL: [Stage; 3] = [Stage::Separation, Stage::Transcription, Stage::Chords];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Separation => "separation",
            Stage::Transcription => "transcription",
            Stage::Chords => "chords",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "separation" => Some(Stage::Separation),
            "transcription" => Some(Stage::Transcription),
            "chords" => Some(Stage::Chords),
            _ => None,
        }
    }

    /// Share of overall job progress owned by this stage, as `(start, end)`
    pub fn progress_window(&self) -> (u8, u8) {
        match self {
            Stage::Separation => (0, 33),
            Stage::Transcription => (33, 66),
            Stage::Chords => (66, 100),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result metadata filled in as stages finish
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobMetadata {
    pub duration_secs: Option<f64>,
    pub tempo_bpm: Option<f64>,
    pub num_frames: Option<i64>,
    pub num_chords: Option<i64>,
}

/// Result file references
///
/// Used both as the stored record and as a partial update: `None` fields
/// (and an empty stem map) leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobFiles {
    pub input_file: Option<String>,
    pub stems: BTreeMap<String, String>,
    pub frames_json: Option<String>,
    pub pitch_csv: Option<String>,
    pub notes_json: Option<String>,
    pub midi: Option<String>,
    pub chords_json: Option<String>,
    pub chords_lab: Option<String>,
    pub chords_csv: Option<String>,
}

/// Persistent job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    /// Non-null only while Processing
    pub stage: Option<Stage>,
    /// Overall progress 0-100
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    /// Set iff status is terminal
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    /// Latest human-readable progress note
    pub status_message: Option<String>,
    pub input_filename: String,
    pub file_size: i64,
    pub metadata: JobMetadata,
    pub files: JobFiles,
}

impl Job {
    /// New queued job with a fresh v4 id
    pub fn new(input_filename: impl Into<String>, file_size: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Queued,
            stage: None,
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error_message: None,
            status_message: None,
            input_filename: input_filename.into(),
            file_size,
            metadata: JobMetadata::default(),
            files: JobFiles::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
