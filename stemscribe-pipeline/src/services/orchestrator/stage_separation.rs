//! Stage 1: SEPARATION
//!
//! Chunked source separation, crossfade reassembly, stem files on disk

use super::{path_string, JobDirs, PipelineOrchestrator, SeparationOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::models::{plan_chunks, JobFiles, JobMetadata, Stage, StemSet};
use crate::services::chunk_stitcher::ChunkStitcher;
use crate::services::progress::{ProgressCoordinator, ScaledProgress};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Local progress window shared by all chunks
const CHUNKS_START: u32 = 5;
const CHUNKS_END: u32 = 65;

impl PipelineOrchestrator {
    pub(super) async fn stage_separation(
        &self,
        job_id: Uuid,
        input: &Path,
        dirs: &JobDirs,
        progress: &ProgressCoordinator,
    ) -> PipelineResult<SeparationOutput> {
        let reporter = progress.stage_reporter(Stage::Separation);
        reporter.checkpoint(0, "Initializing source separation").await?;

        let config = &self.settings.separation;
        let audio = self.models.audio.load(input, Some(config.sample_rate)).await?;
        let duration_secs = audio.duration_secs();

        let rate = audio.sample_rate as usize;
        let chunks = plan_chunks(
            audio.frames(),
            config.chunk_duration_secs as usize * rate,
            config.overlap_secs as usize * rate,
        );
        let overlap_frames = config.overlap_secs as usize * rate;

        tracing::info!(
            job_id = %job_id,
            model = %self.models.separation.name(),
            duration_secs,
            chunks = chunks.len(),
            "Separating sources"
        );

        let mut separated: Vec<StemSet> = Vec::with_capacity(chunks.len());
        for bounds in &chunks {
            let n = bounds.count as u32;
            let i = bounds.index as u32;
            let start = CHUNKS_START + (CHUNKS_END - CHUNKS_START) * i / n;
            let end = CHUNKS_START + (CHUNKS_END - CHUNKS_START) * (i + 1) / n;

            let slice = audio.slice(bounds.start_frame, bounds.end_frame);
            let sink = ScaledProgress::new(&reporter, start as u8, end as u8);
            let stems = self.models.separation.separate(&slice, *bounds, &sink).await?;

            tracing::debug!(
                job_id = %job_id,
                chunk = bounds.index + 1,
                of = bounds.count,
                stems = stems.len(),
                "Chunk separated"
            );
            reporter
                .checkpoint(end as u8, &format!("Separated chunk {} of {}", bounds.index + 1, bounds.count))
                .await?;
            separated.push(stems);
        }
        drop(audio);

        let stitcher = ChunkStitcher::new(config.crossfade_curve);
        let stems = tokio::task::spawn_blocking(move || stitcher.stitch(&separated, overlap_frames))
            .await
            .map_err(|e| PipelineError::Audio(format!("Stitch task failed: {}", e)))?;
        if stems.is_empty() {
            return Err(PipelineError::Model("separation produced no stems".to_string()));
        }

        reporter.checkpoint(70, "Saving separated stems").await?;
        let mut stem_paths = BTreeMap::new();
        for (name, buffer) in &stems {
            let path = dirs.separated.join(format!("{}.wav", name));
            self.models.audio.write_wav(&path, buffer).await?;
            stem_paths.insert(name.clone(), path);
        }

        reporter.checkpoint(90, "Copying original audio file").await?;
        let extension = input
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bin".to_string());
        let original_copy = dirs.separated.join(format!("original.{}", extension));
        tokio::fs::copy(input, &original_copy).await?;

        let files = JobFiles {
            input_file: Some(path_string(input)),
            stems: stem_paths.iter().map(|(k, v)| (k.clone(), path_string(v))).collect(),
            ..JobFiles::default()
        };
        self.store.update_file_paths(job_id, &files).await?;
        self.store
            .update_metadata(
                job_id,
                &JobMetadata {
                    duration_secs: Some(duration_secs),
                    ..JobMetadata::default()
                },
            )
            .await?;

        reporter
            .checkpoint(100, &format!("Separated into {} stems successfully", stem_paths.len()))
            .await?;

        Ok(SeparationOutput { stems: stem_paths })
    }
}
