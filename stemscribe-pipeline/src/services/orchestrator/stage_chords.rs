//! Stage 3: CHORDS
//!
//! Stem mix, chord recognition and chord event building

use super::{path_string, JobDirs, PipelineOrchestrator, SeparationOutput, TranscriptionOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::export;
use crate::models::{ChordProgression, JobFiles, JobMetadata, Stage, StemSet};
use crate::services::chord_builder::{ChordBuilderConfig, ChordEventBuilder};
use crate::services::progress::{ProgressCoordinator, ScaledProgress};
use crate::services::stem_mixer::{StemMixer, BASS_STEM, INSTRUMENTAL_STEM, OTHER_STEM};
use uuid::Uuid;

impl PipelineOrchestrator {
    pub(super) async fn stage_chords(
        &self,
        job_id: Uuid,
        separated: &SeparationOutput,
        transcribed: &TranscriptionOutput,
        dirs: &JobDirs,
        progress: &ProgressCoordinator,
    ) -> PipelineResult<()> {
        let reporter = progress.stage_reporter(Stage::Chords);
        reporter.checkpoint(0, "Loading chord recognition model").await?;

        let config = &self.settings.chords;

        reporter.checkpoint(15, "Mixing stems for chord detection").await?;
        let wanted: &[&str] = if separated.stems.contains_key(INSTRUMENTAL_STEM) {
            &[INSTRUMENTAL_STEM]
        } else {
            &[BASS_STEM, OTHER_STEM]
        };
        let mut stems = StemSet::new();
        for name in wanted {
            if let Some(path) = separated.stems.get(*name) {
                let buffer = self.models.audio.load(path, Some(config.sample_rate)).await?;
                stems.insert(name.to_string(), buffer);
            }
        }

        let mixer = StemMixer::new(config);
        let mix = tokio::task::spawn_blocking(move || mixer.mix(&stems))
            .await
            .map_err(|e| PipelineError::Audio(format!("Mix task failed: {}", e)))??;

        reporter.checkpoint(30, "Detecting chord progressions from stems").await?;
        let frames = self
            .models
            .chords
            .predict(&mix, &ScaledProgress::new(&reporter, 30, 80))
            .await?;

        tracing::info!(
            job_id = %job_id,
            model = %self.models.chords.name(),
            frames = frames.len(),
            "Chord frames predicted"
        );

        let events = ChordEventBuilder::new(ChordBuilderConfig::from(config)).build(&frames);
        let progression = ChordProgression {
            events,
            duration: mix.duration_secs(),
            sample_rate: mix.sample_rate,
            tempo_bpm: transcribed.tempo_bpm,
            key_info: Some(transcribed.key.clone()),
        };

        reporter.checkpoint(85, "Saving chord progression data").await?;
        let chords_json = dirs.chords.join("chords.json");
        let chords_lab = dirs.chords.join("chords.lab");
        let chords_csv = dirs.chords.join("chords.csv");
        export::export_chords_json(&progression, &chords_json)?;
        export::export_chords_lab(&progression, &chords_lab)?;
        export::export_chords_csv(&progression, &chords_csv)?;

        let files = JobFiles {
            chords_json: Some(path_string(&chords_json)),
            chords_lab: Some(path_string(&chords_lab)),
            chords_csv: Some(path_string(&chords_csv)),
            ..JobFiles::default()
        };
        self.store.update_file_paths(job_id, &files).await?;
        self.store
            .update_metadata(
                job_id,
                &JobMetadata {
                    num_chords: Some(progression.events.len() as i64),
                    ..JobMetadata::default()
                },
            )
            .await?;

        reporter
            .checkpoint(
                100,
                &format!("Detected {} chords successfully", progression.events.len()),
            )
            .await?;
        Ok(())
    }
}
