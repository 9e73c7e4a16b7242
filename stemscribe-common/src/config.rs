//! Configuration loading and storage root resolution
//!
//! Settings come from a TOML file whose every field has a default, then
//! environment overrides, then command-line flags applied by the binary.
//!
//! Storage root priority:
//! 1. Command-line argument (highest priority)
//! 2. `STEMSCRIBE_STORAGE` environment variable
//! 3. `storage.root` in the TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, FadeCurve, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the storage root
pub const ENV_STORAGE: &str = "STEMSCRIBE_STORAGE";
/// Environment variable overriding the worker pool size
pub const ENV_MAX_CONCURRENT_JOBS: &str = "STEMSCRIBE_MAX_CONCURRENT_JOBS";
/// Environment variable overriding the log filter
pub const ENV_LOG: &str = "STEMSCRIBE_LOG";

/// Config file name looked up in the platform config directories
const CONFIG_FILE_NAME: &str = "stemscribe.toml";

/// Complete service settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageConfig,
    pub scheduler: SchedulerConfig,
    pub separation: SeparationConfig,
    pub transcription: TranscriptionConfig,
    pub chords: ChordConfig,
    pub models: ModelCommands,
    pub logging: LoggingConfig,
}

/// Where job artifacts and the job database live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage root; `None` falls back to the OS default
    pub root: Option<PathBuf>,
    /// Database file name inside the storage root
    pub database_file: String,
    /// Days to keep terminal jobs before `cleanup` removes them
    pub job_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: None,
            database_file: "stemscribe.db".to_string(),
            job_retention_days: 7,
        }
    }
}

/// Worker pool sizing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneously active jobs (= worker count)
    pub max_concurrent_jobs: usize,
    /// Max time to keep retrying a locked database write
    pub db_max_lock_wait_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 3,
            db_max_lock_wait_ms: 5000,
        }
    }
}

/// Source separation stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SeparationConfig {
    /// Inputs longer than this are separated in chunks
    pub chunk_duration_secs: u32,
    /// Overlap between consecutive chunks
    pub overlap_secs: u32,
    /// Model input sample rate
    pub sample_rate: u32,
    /// Stems kept from the model output
    pub stems: Vec<String>,
    /// Curve used to blend chunk overlaps
    pub crossfade_curve: FadeCurve,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            chunk_duration_secs: 60,
            overlap_secs: 2,
            sample_rate: 44100,
            stems: ["vocals", "bass", "drums", "other", "instrumental"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            crossfade_curve: FadeCurve::RaisedCosine,
        }
    }
}

/// Vocal transcription stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Pitch model input sample rate
    pub sample_rate: u32,
    /// Time between pitch frames
    pub hop_size_ms: u32,
    /// Frames below this confidence are treated as unvoiced
    pub confidence_threshold: f64,
    /// Notes shorter than this are merged into the previous note
    pub min_note_duration_ms: u32,
    /// Silence longer than this starts a new note
    pub note_gap_threshold_ms: u32,
    /// Pitch jump (semitones) that splits a note
    pub pitch_jump_threshold: f64,
    /// Median filter window over voiced frames
    pub median_filter_size: usize,
    /// Deviation (semitones) from neighbours that triggers octave correction
    pub octave_jump_threshold: f64,
    /// Note velocity written to MIDI
    pub default_velocity: u8,
    /// Tempo used when no estimator produces a usable value
    pub default_tempo_bpm: f64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            hop_size_ms: 10,
            confidence_threshold: 0.6,
            min_note_duration_ms: 40,
            note_gap_threshold_ms: 80,
            pitch_jump_threshold: 1.5,
            median_filter_size: 5,
            octave_jump_threshold: 10.0,
            default_velocity: 100,
            default_tempo_bpm: 120.0,
        }
    }
}

impl TranscriptionConfig {
    /// Hop size in seconds
    pub fn hop_seconds(&self) -> f64 {
        self.hop_size_ms as f64 / 1000.0
    }
}

/// Chord detection stage settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChordConfig {
    /// Chord model input sample rate
    pub sample_rate: u32,
    pub bass_weight: f32,
    pub other_weight: f32,
    /// Peak-normalise the mixed input
    pub normalize_mix: bool,
    pub peak_normalize_db: f32,
    /// Events shorter than this are dropped
    pub min_chord_duration_ms: u32,
    /// Remove short blips between two identical chords
    pub smooth_chords: bool,
    /// Events below this confidence are dropped (0 disables)
    pub filter_low_confidence: f64,
}

impl Default for ChordConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22050,
            bass_weight: 0.5,
            other_weight: 0.5,
            normalize_mix: true,
            peak_normalize_db: -1.0,
            min_chord_duration_ms: 100,
            smooth_chords: true,
            filter_low_confidence: 0.3,
        }
    }
}

/// External commands backing the inference models
///
/// Each entry is an argv vector; the pipeline appends its own arguments.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelCommands {
    pub separation: Option<Vec<String>>,
    pub pitch: Option<Vec<String>>,
    pub chords: Option<Vec<String>>,
    /// Tried in order until one yields a tempo in range
    pub tempo: Vec<Vec<String>>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "stemscribe=info,stemscribe_pipeline=info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings
    ///
    /// An explicitly given file must exist and parse. Without one, the
    /// platform config locations are tried and a missing file falls back to
    /// defaults with a warning. Environment overrides are applied last.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut settings = match explicit_path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_file() {
                Some(path) => Self::from_file(&path)?,
                None => {
                    warn!("No config file found, using compiled defaults");
                    Settings::default()
                }
            },
        };

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let settings = Self::from_toml_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(settings)
    }

    /// Parse settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
    }

    /// Apply `STEMSCRIBE_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(root) = std::env::var(ENV_STORAGE) {
            if !root.trim().is_empty() {
                self.storage.root = Some(PathBuf::from(root));
            }
        }

        if let Ok(value) = std::env::var(ENV_MAX_CONCURRENT_JOBS) {
            self.scheduler.max_concurrent_jobs = value.trim().parse().map_err(|_| {
                Error::Config(format!(
                    "{} must be a positive integer, got '{}'",
                    ENV_MAX_CONCURRENT_JOBS, value
                ))
            })?;
        }

        if let Ok(filter) = std::env::var(ENV_LOG) {
            if !filter.trim().is_empty() {
                self.logging.filter = filter;
            }
        }

        Ok(())
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent_jobs == 0 {
            return Err(Error::Config("max_concurrent_jobs must be at least 1".to_string()));
        }
        if self.separation.chunk_duration_secs == 0 {
            return Err(Error::Config("chunk_duration_secs must be at least 1".to_string()));
        }
        if self.separation.overlap_secs >= self.separation.chunk_duration_secs {
            return Err(Error::Config(format!(
                "overlap_secs ({}) must be smaller than chunk_duration_secs ({})",
                self.separation.overlap_secs, self.separation.chunk_duration_secs
            )));
        }
        if self.separation.sample_rate == 0
            || self.transcription.sample_rate == 0
            || self.chords.sample_rate == 0
        {
            return Err(Error::Config("sample rates must be non-zero".to_string()));
        }
        if self.transcription.hop_size_ms == 0 {
            return Err(Error::Config("hop_size_ms must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.transcription.confidence_threshold) {
            return Err(Error::Config("confidence_threshold must be within [0, 1]".to_string()));
        }
        if self.transcription.default_velocity == 0 || self.transcription.default_velocity > 127 {
            return Err(Error::Config("default_velocity must be within [1, 127]".to_string()));
        }
        if self.chords.bass_weight < 0.0
            || self.chords.other_weight < 0.0
            || self.chords.bass_weight + self.chords.other_weight <= 0.0
        {
            return Err(Error::Config("stem mix weights must be non-negative and not both zero".to_string()));
        }
        Ok(())
    }

    /// Resolve the storage root following the documented priority order
    ///
    /// `settings.storage.root` already carries the environment override when
    /// loaded through [`Settings::load`].
    pub fn storage_root(&self, cli_arg: Option<&Path>) -> PathBuf {
        if let Some(path) = cli_arg {
            return path.to_path_buf();
        }
        if let Some(root) = &self.storage.root {
            return root.clone();
        }
        default_storage_root()
    }
}

/// Per-job artifact directory: `<root>/jobs/<job_id>`
pub fn job_storage_path(root: &Path, job_id: impl Display) -> PathBuf {
    root.join("jobs").join(job_id.to_string())
}

/// First existing config file among the platform locations
fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("stemscribe").join(CONFIG_FILE_NAME));
    let local_config = PathBuf::from(CONFIG_FILE_NAME);

    let mut candidates: Vec<PathBuf> = Vec::new();
    candidates.push(local_config);
    if let Some(path) = user_config {
        candidates.push(path);
    }
    if cfg!(target_os = "linux") {
        candidates.push(PathBuf::from("/etc/stemscribe").join(CONFIG_FILE_NAME));
    }

    candidates.into_iter().find(|p| p.exists())
}

/// Get OS-dependent default storage root
fn default_storage_root() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("stemscribe"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/stemscribe"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("stemscribe"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/stemscribe"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("stemscribe"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\stemscribe"))
    } else {
        PathBuf::from("./stemscribe_data")
    }
}
