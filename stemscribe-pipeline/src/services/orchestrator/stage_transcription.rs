//! Stage 2: TRANSCRIPTION
//!
//! Tempo, pitch tracking, contour cleanup, key and note segmentation of the
//! vocal stem

use super::{path_string, JobDirs, PipelineOrchestrator, SeparationOutput, TranscriptionOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::export::{self, FramesMetadata, MidiSettings, NotesDocument};
use crate::models::{JobFiles, JobMetadata, Stage};
use crate::services::key_estimator::KeyEstimator;
use crate::services::note_segmenter::NoteSegmenter;
use crate::services::pitch_cleaner::PitchCleaner;
use crate::services::progress::{ProgressCoordinator, ScaledProgress};
use std::path::Path;
use uuid::Uuid;

const VOCALS_STEM: &str = "vocals";

impl PipelineOrchestrator {
    pub(super) async fn stage_transcription(
        &self,
        job_id: Uuid,
        input: &Path,
        separated: &SeparationOutput,
        dirs: &JobDirs,
        progress: &ProgressCoordinator,
    ) -> PipelineResult<TranscriptionOutput> {
        let reporter = progress.stage_reporter(Stage::Transcription);
        reporter
            .checkpoint(0, "Loading vocal track and initializing transcription model")
            .await?;

        let config = &self.settings.transcription;
        let vocals_path = separated.stems.get(VOCALS_STEM).ok_or_else(|| {
            PipelineError::InvalidInput(format!("separation produced no '{}' stem", VOCALS_STEM))
        })?;

        let tempo_bpm = self.models.tempo.detect(input).await;

        reporter.checkpoint(20, "Analyzing pitch and extracting vocal melody").await?;
        let vocals = self
            .models
            .audio
            .load(vocals_path, Some(config.sample_rate))
            .await?
            .to_mono();
        let duration_secs = vocals.duration_secs();

        let raw = self
            .models
            .pitch
            .detect(&vocals, &ScaledProgress::new(&reporter, 20, 70))
            .await?;
        drop(vocals);

        tracing::info!(
            job_id = %job_id,
            model = %self.models.pitch.name(),
            frames = raw.len(),
            "Pitch frames detected"
        );

        let frames = PitchCleaner::new(config).clean(&raw);
        let key = KeyEstimator::new().estimate(&frames);
        let notes = NoteSegmenter::new(config.clone()).segment(&frames);

        reporter.checkpoint(80, "Exporting processed frames and metadata").await?;
        let frames_json = dirs.transcription.join("processed_frames.json");
        let pitch_csv = dirs.transcription.join("pitch.csv");
        let notes_json = dirs.transcription.join("notes.json");
        let midi = dirs.transcription.join("vocals.mid");

        let metadata = FramesMetadata {
            original_song_path: Some(path_string(input)),
            vocal_file_path: Some(path_string(vocals_path)),
            bpm: Some(tempo_bpm),
        };
        export::export_frames_json(&frames, &metadata, &frames_json)?;
        export::export_pitch_csv(&frames, &pitch_csv)?;
        export::export_notes_json(
            &NotesDocument::new(&notes, &key, duration_secs, tempo_bpm, config.sample_rate),
            &notes_json,
        )?;
        export::export_midi(&notes, Some(&key), MidiSettings::new(tempo_bpm), &midi)?;

        let files = JobFiles {
            frames_json: Some(path_string(&frames_json)),
            pitch_csv: Some(path_string(&pitch_csv)),
            notes_json: Some(path_string(&notes_json)),
            midi: Some(path_string(&midi)),
            ..JobFiles::default()
        };
        self.store.update_file_paths(job_id, &files).await?;
        self.store
            .update_metadata(
                job_id,
                &JobMetadata {
                    tempo_bpm: Some(tempo_bpm),
                    num_frames: Some(frames.len() as i64),
                    ..JobMetadata::default()
                },
            )
            .await?;

        tracing::info!(
            job_id = %job_id,
            notes = notes.len(),
            key = %format!("{} {}", key.tonic_name, key.scale_type),
            "Vocal transcription finished"
        );

        reporter
            .checkpoint(
                100,
                &format!("Transcribed {} frames at {:.1} BPM", frames.len(), tempo_bpm),
            )
            .await?;

        Ok(TranscriptionOutput { tempo_bpm, key })
    }
}
