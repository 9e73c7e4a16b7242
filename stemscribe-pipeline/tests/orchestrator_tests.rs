//! End-to-end pipeline runs with in-process model fakes
//!
//! Audio goes through the real filesystem layer; separation, pitch and chord
//! models are deterministic stand-ins.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stemscribe_common::config::Settings;
use stemscribe_pipeline::backends::{ChordModel, FileAudioIo, PitchModel, SeparationModel};
use stemscribe_pipeline::db::{init_tables, JobRepository, SqliteJobStore};
use stemscribe_pipeline::models::{
    AudioBuffer, ChunkBounds, Job, JobFiles, JobStatus, MonoBuffer, PitchFrame, RawChordFrame, StemSet,
};
use stemscribe_pipeline::services::{JobScheduler, PipelineModels, PipelineOrchestrator, ProgressSink, TempoChain};
use stemscribe_pipeline::utils::write_wav;
use stemscribe_pipeline::{PipelineError, PipelineResult};
use tempfile::TempDir;

const RATE: u32 = 8000;

/// Vocals are the left channel, instrumental the right
struct FakeSeparation;

#[async_trait]
impl SeparationModel for FakeSeparation {
    fn name(&self) -> &str {
        "fake-separation"
    }

    async fn separate(
        &self,
        audio: &AudioBuffer,
        _chunk: ChunkBounds,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<StemSet> {
        progress.report(50, "halfway").await;
        let mut stems = StemSet::new();
        stems.insert(
            "vocals".to_string(),
            AudioBuffer::new(vec![audio.channels[0].clone()], audio.sample_rate),
        );
        stems.insert(
            "instrumental".to_string(),
            AudioBuffer::new(vec![audio.channels[1].clone()], audio.sample_rate),
        );
        Ok(stems)
    }
}

/// One second of A3 followed by silence
struct FakePitch;

#[async_trait]
impl PitchModel for FakePitch {
    fn name(&self) -> &str {
        "fake-pitch"
    }

    async fn detect(&self, audio: &MonoBuffer, _progress: &dyn ProgressSink) -> PipelineResult<Vec<PitchFrame>> {
        // 10 ms hop
        let frames = audio.samples.len() / (audio.sample_rate as usize / 100);
        Ok((0..frames)
            .map(|i| {
                let time = i as f64 * 0.01;
                if time < 1.0 {
                    PitchFrame::new(time, 220.0, 0.9)
                } else {
                    PitchFrame::unvoiced(time, 0.1)
                }
            })
            .collect())
    }
}

struct FakeChords {
    fail: bool,
}

#[async_trait]
impl ChordModel for FakeChords {
    fn name(&self) -> &str {
        "fake-chords"
    }

    async fn predict(&self, audio: &MonoBuffer, progress: &dyn ProgressSink) -> PipelineResult<Vec<RawChordFrame>> {
        if self.fail {
            return Err(PipelineError::Model("chord model crashed".to_string()));
        }
        if audio.samples.iter().all(|s| *s == 0.0) {
            return Err(PipelineError::Model("silent chord input".to_string()));
        }
        progress.report(100, "done").await;
        Ok(vec![
            RawChordFrame::new(0.0, "C:maj", 0.9),
            RawChordFrame::new(0.5, "C:maj", 0.8),
            RawChordFrame::new(1.0, "G:maj", 0.9),
            RawChordFrame::new(1.5, "G:maj", 0.7),
        ])
    }
}

struct Harness {
    dir: TempDir,
    store: Arc<dyn JobRepository>,
    orchestrator: Arc<PipelineOrchestrator>,
    input: PathBuf,
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.separation.sample_rate = RATE;
    settings.separation.chunk_duration_secs = 2;
    settings.separation.overlap_secs = 1;
    settings.transcription.sample_rate = RATE;
    settings.chords.sample_rate = RATE;
    settings
}

async fn harness(chords_fail: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_tables(&pool).await.unwrap();
    let store: Arc<dyn JobRepository> = Arc::new(SqliteJobStore::new(pool, 1000));

    let input = write_song(dir.path(), "song.wav", false);

    let models = PipelineModels {
        audio: Arc::new(FileAudioIo),
        separation: Arc::new(FakeSeparation),
        pitch: Arc::new(FakePitch),
        chords: Arc::new(FakeChords { fail: chords_fail }),
        tempo: TempoChain::new(Vec::new(), 120.0),
    };
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        Arc::clone(&store),
        models,
        Arc::new(test_settings()),
        dir.path().join("storage"),
    ));

    Harness {
        dir,
        store,
        orchestrator,
        input,
    }
}

/// Three seconds of stereo; the right channel becomes the instrumental stem
fn write_song(dir: &Path, name: &str, silent_instrumental: bool) -> PathBuf {
    let frames = 3 * RATE as usize;
    let left: Vec<f32> = (0..frames).map(|i| (i as f32 * 0.2).sin() * 0.4).collect();
    let right: Vec<f32> = if silent_instrumental {
        vec![0.0; frames]
    } else {
        (0..frames).map(|i| (i as f32 * 0.05).sin() * 0.4).collect()
    };
    let path = dir.join(name);
    write_wav(&path, &AudioBuffer::new(vec![left, right], RATE)).unwrap();
    path
}

fn input_files(input: &Path) -> JobFiles {
    JobFiles {
        input_file: Some(input.to_string_lossy().into_owned()),
        ..JobFiles::default()
    }
}

async fn queue_job(h: &Harness, input: &Path) -> Job {
    let job = Job::new("song.wav", 1);
    h.store.create(&job).await.unwrap();
    h.store.update_file_paths(job.id, &input_files(input)).await.unwrap();
    job
}

/// Admit and submit one job per input the way the CLI does, waiting for a
/// free slot before each
async fn run_batch(h: &Harness, inputs: &[PathBuf], max_jobs: usize) -> Vec<uuid::Uuid> {
    let scheduler = JobScheduler::new(max_jobs);
    let mut ids = Vec::new();
    for input in inputs {
        scheduler.wait_for_slot().await.unwrap();
        let job = Job::new("song.wav", 1);
        h.store.admit(&job, max_jobs).await.unwrap();
        h.store.update_file_paths(job.id, &input_files(input)).await.unwrap();

        let orchestrator = Arc::clone(&h.orchestrator);
        let job_id = job.id;
        scheduler
            .submit(
                job_id,
                Box::pin(async move {
                    orchestrator.run(job_id).await?;
                    Ok::<(), anyhow::Error>(())
                }),
            )
            .unwrap();
        ids.push(job_id);
    }
    scheduler.shutdown(true).await;
    ids
}

#[tokio::test]
async fn test_successful_run_completes_job_with_artifacts() {
    let h = harness(false).await;
    let job = queue_job(&h, &h.input).await;

    h.orchestrator.run(job.id).await.unwrap();

    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.progress, 100);
    assert!(job.stage.is_none());
    assert!(job.error_message.is_none());
    assert!(job.started_at.is_some());
    assert!(job.completed_at.is_some());

    assert_eq!(job.metadata.tempo_bpm, Some(120.0));
    assert_eq!(job.metadata.num_frames, Some(300));
    assert_eq!(job.metadata.num_chords, Some(2));
    let duration = job.metadata.duration_secs.unwrap();
    assert!((duration - 3.0).abs() < 1e-6);

    let dirs = h.orchestrator.job_dirs(job.id);
    assert!(dirs.separated.join("vocals.wav").is_file());
    assert!(dirs.separated.join("instrumental.wav").is_file());
    assert!(dirs.separated.join("original.wav").is_file());
    assert_eq!(job.files.stems.len(), 2);

    for file in [
        &job.files.frames_json,
        &job.files.pitch_csv,
        &job.files.notes_json,
        &job.files.midi,
        &job.files.chords_json,
        &job.files.chords_lab,
        &job.files.chords_csv,
    ] {
        let path = file.as_ref().expect("artifact path recorded");
        assert!(Path::new(path).is_file(), "{} missing", path);
    }

    let lab = std::fs::read_to_string(dirs.chords.join("chords.lab")).unwrap();
    let lines: Vec<&str> = lab.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("C:maj"));
    assert!(lines[1].ends_with("G:maj"));

    let notes: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(dirs.transcription.join("notes.json")).unwrap()).unwrap();
    assert_eq!(notes["tempo_bpm"], 120.0);
    assert_eq!(notes["notes"][0]["anchor_midi"], 57);
}

#[tokio::test]
async fn test_stage_failure_marks_job_failed_and_freezes_progress() {
    let h = harness(true).await;
    let job = queue_job(&h, &h.input).await;

    let err = h.orchestrator.run(job.id).await.unwrap_err();
    assert!(matches!(err, PipelineError::StageFailure { .. }));

    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.stage.is_none());
    assert!(job.progress >= 66 && job.progress < 100, "progress {}", job.progress);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("chords stage failed"), "{}", message);
    assert!(message.contains("chord model crashed"));

    // Earlier stages' artifacts stay
    assert!(job.files.midi.is_some());
    assert!(job.files.chords_json.is_none());
    assert!(job.metadata.num_chords.is_none());
}

#[tokio::test]
async fn test_missing_input_fails_in_separation() {
    let h = harness(false).await;
    let missing = h.input.with_file_name("gone.wav");
    let job = queue_job(&h, &missing).await;

    h.orchestrator.run(job.id).await.unwrap_err();

    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.progress, 0);
    assert!(job.error_message.unwrap().starts_with("separation stage failed"));
}

#[tokio::test]
async fn test_unknown_job_is_not_found() {
    let h = harness(false).await;
    let err = h.orchestrator.run(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn test_terminal_job_is_not_rerun() {
    let h = harness(false).await;
    let job = queue_job(&h, &h.input).await;
    h.orchestrator.run(job.id).await.unwrap();

    assert!(h.orchestrator.run(job.id).await.is_err());
    let job = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_batch_larger_than_capacity_runs_every_job() {
    let h = harness(false).await;
    let inputs = vec![h.input.clone(); 3];

    let ids = run_batch(&h, &inputs, 1).await;

    assert_eq!(ids.len(), 3);
    for id in ids {
        let job = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error_message);
        assert_eq!(job.progress, 100);
    }
    assert_eq!(h.store.count_active().await.unwrap(), 0);
}

#[tokio::test]
async fn test_failing_job_does_not_disturb_concurrent_job() {
    let h = harness(false).await;
    let silent = write_song(h.dir.path(), "silent.wav", true);

    let ids = run_batch(&h, &[silent, h.input.clone()], 2).await;

    let failed = h.store.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    let message = failed.error_message.unwrap();
    assert!(message.starts_with("chords stage failed"), "{}", message);
    assert!(message.contains("silent chord input"));

    let completed = h.store.get(ids[1]).await.unwrap().unwrap();
    assert_eq!(completed.status, JobStatus::Completed);
    assert_eq!(completed.progress, 100);
    assert!(completed.error_message.is_none());
    assert_eq!(completed.metadata.num_chords, Some(2));
    assert!(Path::new(completed.files.chords_lab.as_deref().unwrap()).is_file());
}
