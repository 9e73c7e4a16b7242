//! Pipeline orchestrator
//!
//! Runs one job through its three stages:
//!
//! QUEUED → SEPARATION → TRANSCRIPTION → CHORDS → COMPLETED
//!
//! Each stage lives in its own `stage_*` module. A stage error marks the job
//! Failed with a readable message, skips the remaining stages, and is
//! returned to the worker that ran the job. Artifacts written by earlier
//! stages stay on disk and referenced from the job record.

use crate::backends::{
    AudioIo, ChordModel, ExternalChordModel, ExternalCommand, ExternalPitchModel, ExternalSeparationModel,
    ExternalTempoEstimator, FileAudioIo, PitchModel, SeparationModel, TempoEstimator, UnconfiguredModel,
};
use crate::db::JobRepository;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{Job, KeyInfo, Stage};
use crate::services::progress::ProgressCoordinator;
use crate::services::tempo::TempoChain;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemscribe_common::config::{job_storage_path, Settings};
use uuid::Uuid;

mod stage_chords;
mod stage_separation;
mod stage_transcription;

/// Model and audio collaborators used by the stages
#[derive(Clone)]
pub struct PipelineModels {
    pub audio: Arc<dyn AudioIo>,
    pub separation: Arc<dyn SeparationModel>,
    pub pitch: Arc<dyn PitchModel>,
    pub chords: Arc<dyn ChordModel>,
    pub tempo: TempoChain,
}

impl PipelineModels {
    /// External-command models from the `[models]` config section
    ///
    /// A model without a command is replaced by [`UnconfiguredModel`], so
    /// jobs fail in the stage that needs it rather than at startup.
    pub fn from_settings(settings: &Settings) -> PipelineResult<Self> {
        let commands = &settings.models;

        let separation: Arc<dyn SeparationModel> = match &commands.separation {
            Some(argv) => Arc::new(ExternalSeparationModel::new(
                ExternalCommand::new(argv)?,
                settings.separation.stems.clone(),
            )),
            None => Arc::new(UnconfiguredModel::new("separation")),
        };
        let pitch: Arc<dyn PitchModel> = match &commands.pitch {
            Some(argv) => Arc::new(ExternalPitchModel::new(ExternalCommand::new(argv)?)),
            None => Arc::new(UnconfiguredModel::new("pitch")),
        };
        let chords: Arc<dyn ChordModel> = match &commands.chords {
            Some(argv) => Arc::new(ExternalChordModel::new(ExternalCommand::new(argv)?)),
            None => Arc::new(UnconfiguredModel::new("chord")),
        };

        let mut estimators: Vec<Arc<dyn TempoEstimator>> = Vec::with_capacity(commands.tempo.len());
        for argv in &commands.tempo {
            estimators.push(Arc::new(ExternalTempoEstimator::new(ExternalCommand::new(argv)?)));
        }

        Ok(Self {
            audio: Arc::new(FileAudioIo),
            separation,
            pitch,
            chords,
            tempo: TempoChain::new(estimators, settings.transcription.default_tempo_bpm),
        })
    }
}

/// Per-job artifact directories: `<root>/jobs/<id>/{input,separated,transcription,chords}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirs {
    pub root: PathBuf,
    pub input: PathBuf,
    pub separated: PathBuf,
    pub transcription: PathBuf,
    pub chords: PathBuf,
}

impl JobDirs {
    pub fn new(storage_root: &Path, job_id: Uuid) -> Self {
        let root = job_storage_path(storage_root, job_id);
        Self {
            input: root.join("input"),
            separated: root.join("separated"),
            transcription: root.join("transcription"),
            chords: root.join("chords"),
            root,
        }
    }

    pub async fn create_all(&self) -> PipelineResult<()> {
        for dir in [&self.input, &self.separated, &self.transcription, &self.chords] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// What separation hands to the later stages
#[derive(Debug, Clone)]
pub(crate) struct SeparationOutput {
    /// Stem name → WAV path
    pub stems: BTreeMap<String, PathBuf>,
}

/// What transcription hands to the chord stage
#[derive(Debug, Clone)]
pub(crate) struct TranscriptionOutput {
    pub tempo_bpm: f64,
    pub key: KeyInfo,
}

/// Runs jobs through separation, transcription and chord detection
pub struct PipelineOrchestrator {
    store: Arc<dyn JobRepository>,
    models: PipelineModels,
    settings: Arc<Settings>,
    storage_root: PathBuf,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn JobRepository>,
        models: PipelineModels,
        settings: Arc<Settings>,
        storage_root: PathBuf,
    ) -> Self {
        Self {
            store,
            models,
            settings,
            storage_root,
        }
    }

    pub fn job_dirs(&self, job_id: Uuid) -> JobDirs {
        JobDirs::new(&self.storage_root, job_id)
    }

    /// Run all stages for `job_id`
    ///
    /// On failure the job is marked Failed before the error is returned.
    pub async fn run(&self, job_id: Uuid) -> PipelineResult<()> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(PipelineError::NotFound(job_id))?;

        let progress = ProgressCoordinator::new(Arc::clone(&self.store), job_id);
        progress.start_job().await?;

        tracing::info!(
            job_id = %job_id,
            input = %job.input_filename,
            "Pipeline started"
        );

        match self.run_stages(&job, &progress).await {
            Ok(()) => {
                progress.complete_job().await?;
                tracing::info!(job_id = %job_id, "Pipeline completed");
                Ok(())
            }
            Err(e) => {
                if let Err(store_err) = progress.fail_job(&e.to_string()).await {
                    tracing::error!(
                        job_id = %job_id,
                        error = %store_err,
                        "Failed to record job failure"
                    );
                }
                Err(e)
            }
        }
    }

    async fn run_stages(&self, job: &Job, progress: &ProgressCoordinator) -> PipelineResult<()> {
        let dirs = self.job_dirs(job.id);
        dirs.create_all().await?;
        let input = self.input_path(job, &dirs)?;

        let separated = self
            .stage_separation(job.id, &input, &dirs, progress)
            .await
            .map_err(|e| e.in_stage(Stage::Separation))?;

        let transcribed = self
            .stage_transcription(job.id, &input, &separated, &dirs, progress)
            .await
            .map_err(|e| e.in_stage(Stage::Transcription))?;

        self.stage_chords(job.id, &separated, &transcribed, &dirs, progress)
            .await
            .map_err(|e| e.in_stage(Stage::Chords))?;

        Ok(())
    }

    /// Recorded input file, or `input/<filename>` under the job directory
    fn input_path(&self, job: &Job, dirs: &JobDirs) -> PipelineResult<PathBuf> {
        let path = match &job.files.input_file {
            Some(path) => PathBuf::from(path),
            None => dirs.input.join(&job.input_filename),
        };
        if !path.is_file() {
            return Err(PipelineError::InvalidInput(format!(
                "input file not found: {}",
                path.display()
            ))
            .in_stage(Stage::Separation));
        }
        Ok(path)
    }
}

pub(crate) fn path_string(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_dirs_layout() {
        let id = Uuid::new_v4();
        let dirs = JobDirs::new(Path::new("/data"), id);
        let root = PathBuf::from("/data/jobs").join(id.to_string());

        assert_eq!(dirs.root, root);
        assert_eq!(dirs.input, root.join("input"));
        assert_eq!(dirs.separated, root.join("separated"));
        assert_eq!(dirs.transcription, root.join("transcription"));
        assert_eq!(dirs.chords, root.join("chords"));
    }

    #[test]
    fn test_models_from_default_settings() {
        let models = PipelineModels::from_settings(&Settings::default()).unwrap();
        assert_eq!(models.separation.name(), "unconfigured");
        assert_eq!(models.pitch.name(), "unconfigured");
        assert!(models.tempo.is_empty());
    }

    #[test]
    fn test_models_reject_empty_command() {
        let mut settings = Settings::default();
        settings.models.chords = Some(Vec::new());
        assert!(PipelineModels::from_settings(&settings).is_err());
    }

    #[tokio::test]
    async fn test_job_dirs_created() {
        let tmp = tempfile::tempdir().unwrap();
        let dirs = JobDirs::new(tmp.path(), Uuid::new_v4());
        dirs.create_all().await.unwrap();
        assert!(dirs.separated.is_dir());
        assert!(dirs.chords.is_dir());
    }
}
