//! External-command model backends
//!
//! Each model is an argv from the `[models]` config section. Audio is handed
//! over as WAV files in a per-call temp location:
//!
//! - separation: `<cmd…> <in.wav> <out_dir>`, writes `<out_dir>/<stem>.wav`
//! - pitch: `<cmd…> <in.wav>`, prints `[{"time", "frequency", "confidence"}]`
//! - chords: `<cmd…> <in.wav>`, prints `[{"time", "label", "confidence"}]`
//! - tempo: `<cmd…> <audio>`, prints a BPM number or a JSON list of beat times

use super::{ChordModel, PitchModel, SeparationModel, TempoEstimator};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{AudioBuffer, ChunkBounds, MonoBuffer, PitchFrame, RawChordFrame, RawPitchFrame, StemSet};
use crate::services::progress::ProgressSink;
use crate::services::tempo::tempo_from_beats;
use crate::utils::audio_io;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use thiserror::Error;

/// External model errors
#[derive(Debug, Error)]
pub enum ExternalModelError {
    /// No command configured
    #[error("Empty model command")]
    EmptyCommand,

    /// Program not found
    #[error("Model binary not found: {0}")]
    BinaryNotFound(String),

    /// Failed to spawn or join the command
    #[error("Failed to execute model: {0}")]
    ExecutionError(String),

    /// Command exited unsuccessfully
    #[error("Model run failed: {0}")]
    AnalysisFailed(String),

    /// Output could not be understood
    #[error("Failed to parse model output: {0}")]
    ParseError(String),

    /// I/O error (temp files, output files)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<ExternalModelError> for PipelineError {
    fn from(err: ExternalModelError) -> Self {
        PipelineError::Model(err.to_string())
    }
}

/// A configured command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCommand {
    program: String,
    args: Vec<String>,
}

impl ExternalCommand {
    pub fn new(argv: &[String]) -> Result<Self, ExternalModelError> {
        let (program, args) = argv.split_first().ok_or(ExternalModelError::EmptyCommand)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Run with `extra` appended to the configured arguments
    pub async fn run(&self, extra: Vec<OsString>) -> Result<Output, ExternalModelError> {
        tracing::debug!(program = %self.program, args = ?self.args, extra = ?extra, "Running model command");

        let output = tokio::task::spawn_blocking({
            let program = self.program.clone();
            let args = self.args.clone();
            move || Command::new(&program).args(&args).args(&extra).output()
        })
        .await
        .map_err(|e| ExternalModelError::ExecutionError(format!("Task join error: {}", e)))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ExternalModelError::BinaryNotFound(self.program.clone()),
            _ => ExternalModelError::ExecutionError(e.to_string()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExternalModelError::AnalysisFailed(format!(
                "Exit code: {:?}, stderr: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        Ok(output)
    }

    /// Run and parse stdout as JSON
    async fn run_json<T: serde::de::DeserializeOwned>(&self, extra: Vec<OsString>) -> Result<T, ExternalModelError> {
        let output = self.run(extra).await?;
        serde_json::from_slice(&output.stdout).map_err(|e| ExternalModelError::ParseError(e.to_string()))
    }
}

/// Temp path unique to one model call
fn temp_path(prefix: &str, extension: &str) -> PathBuf {
    let name = match extension {
        "" => format!("stemscribe_{}_{}", prefix, uuid::Uuid::new_v4()),
        ext => format!("stemscribe_{}_{}.{}", prefix, uuid::Uuid::new_v4(), ext),
    };
    std::env::temp_dir().join(name)
}

async fn write_temp_wav(prefix: &str, buffer: AudioBuffer) -> PipelineResult<PathBuf> {
    let path = temp_path(prefix, "wav");
    let target = path.clone();
    tokio::task::spawn_blocking(move || audio_io::write_wav(&target, &buffer))
        .await
        .map_err(|e| PipelineError::Audio(format!("WAV write task failed: {}", e)))??;
    Ok(path)
}

/// Separation via `<cmd> <in.wav> <out_dir>`
pub struct ExternalSeparationModel {
    command: ExternalCommand,
    stems: Vec<String>,
}

impl ExternalSeparationModel {
    /// `stems` lists the stem files to collect from the output directory
    pub fn new(command: ExternalCommand, stems: Vec<String>) -> Self {
        Self { command, stems }
    }

    /// Read `<stem>.wav` files, fitted to the chunk's rate and length
    fn collect_stems(out_dir: &Path, stems: &[String], sample_rate: u32, frames: usize) -> PipelineResult<StemSet> {
        let mut set = StemSet::new();
        for name in stems {
            let path = out_dir.join(format!("{}.wav", name));
            if !path.exists() {
                continue;
            }
            let mut buffer = audio_io::decode_audio_file(&path)?;
            if buffer.sample_rate != sample_rate {
                buffer = audio_io::resample(buffer, sample_rate)?;
            }
            for channel in buffer.channels.iter_mut() {
                channel.resize(frames, 0.0);
            }
            set.insert(name.clone(), buffer);
        }
        Ok(set)
    }
}

#[async_trait]
impl SeparationModel for ExternalSeparationModel {
    fn name(&self) -> &str {
        self.command.program()
    }

    async fn separate(
        &self,
        audio: &AudioBuffer,
        chunk: ChunkBounds,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<StemSet> {
        progress.report(0, "Running separation model").await;

        let input = write_temp_wav("sep_in", audio.clone()).await?;
        let out_dir = temp_path("sep_out", "");
        tokio::fs::create_dir_all(&out_dir).await?;

        let result = self
            .command
            .run(vec![input.clone().into_os_string(), out_dir.clone().into_os_string()])
            .await;

        let stems = match result {
            Ok(_) => {
                let dir = out_dir.clone();
                let names = self.stems.clone();
                let (rate, frames) = (audio.sample_rate, audio.frames());
                tokio::task::spawn_blocking(move || Self::collect_stems(&dir, &names, rate, frames))
                    .await
                    .map_err(|e| PipelineError::Audio(format!("Stem read task failed: {}", e)))
                    .and_then(|r| r)
            }
            Err(e) => Err(e.into()),
        };

        let _ = tokio::fs::remove_file(&input).await;
        let _ = tokio::fs::remove_dir_all(&out_dir).await;

        let stems = stems?;
        if stems.is_empty() {
            return Err(PipelineError::Model(format!(
                "separation produced none of the expected stems ({}) for chunk {}",
                self.stems.join(", "),
                chunk.index + 1
            )));
        }

        progress.report(100, "Separation model finished").await;
        Ok(stems)
    }
}

/// Pitch tracking via `<cmd> <in.wav>` printing JSON frames
pub struct ExternalPitchModel {
    command: ExternalCommand,
}

impl ExternalPitchModel {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl PitchModel for ExternalPitchModel {
    fn name(&self) -> &str {
        self.command.program()
    }

    async fn detect(&self, audio: &MonoBuffer, progress: &dyn ProgressSink) -> PipelineResult<Vec<PitchFrame>> {
        progress.report(0, "Running pitch model").await;

        let input = write_temp_wav("pitch_in", audio.clone().into_buffer()).await?;
        let result = self
            .command
            .run_json::<Vec<RawPitchFrame>>(vec![input.clone().into_os_string()])
            .await;
        let _ = tokio::fs::remove_file(&input).await;

        let mut frames: Vec<PitchFrame> = result?.into_iter().map(PitchFrame::from).collect();
        frames.sort_by(|a, b| a.time.total_cmp(&b.time));

        progress.report(100, "Pitch model finished").await;
        Ok(frames)
    }
}

/// Chord recognition via `<cmd> <in.wav>` printing JSON frames
pub struct ExternalChordModel {
    command: ExternalCommand,
}

impl ExternalChordModel {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

#[async_trait]
impl ChordModel for ExternalChordModel {
    fn name(&self) -> &str {
        self.command.program()
    }

    async fn predict(&self, audio: &MonoBuffer, progress: &dyn ProgressSink) -> PipelineResult<Vec<RawChordFrame>> {
        progress.report(0, "Running chord model").await;

        let input = write_temp_wav("chords_in", audio.clone().into_buffer()).await?;
        let result = self
            .command
            .run_json::<Vec<RawChordFrame>>(vec![input.clone().into_os_string()])
            .await;
        let _ = tokio::fs::remove_file(&input).await;

        let mut frames = result?;
        frames.sort_by(|a, b| a.time.total_cmp(&b.time));

        progress.report(100, "Chord model finished").await;
        Ok(frames)
    }
}

/// Tempo via `<cmd> <audio>` printing a BPM value or beat times
pub struct ExternalTempoEstimator {
    command: ExternalCommand,
}

impl ExternalTempoEstimator {
    pub fn new(command: ExternalCommand) -> Self {
        Self { command }
    }
}

/// A bare number is a tempo; a JSON list is beat times
fn parse_tempo_output(stdout: &str) -> Result<Option<f64>, ExternalModelError> {
    let text = stdout.trim();
    if let Ok(bpm) = text.parse::<f64>() {
        return Ok(Some(bpm));
    }
    let beats: Vec<f64> =
        serde_json::from_str(text).map_err(|e| ExternalModelError::ParseError(e.to_string()))?;
    Ok(tempo_from_beats(&beats))
}

#[async_trait]
impl TempoEstimator for ExternalTempoEstimator {
    fn name(&self) -> &str {
        self.command.program()
    }

    async fn detect(&self, audio_path: &Path) -> Option<f64> {
        let parsed = match self.command.run(vec![audio_path.as_os_str().to_owned()]).await {
            Ok(output) => parse_tempo_output(&String::from_utf8_lossy(&output.stdout)),
            Err(e) => Err(e),
        };

        match parsed {
            Ok(tempo) => tempo,
            Err(e) => {
                tracing::debug!(estimator = %self.command.program(), error = %e, "Tempo estimator failed");
                None
            }
        }
    }
}
