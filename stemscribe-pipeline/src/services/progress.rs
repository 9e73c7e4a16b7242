//! Job progress coordination
//!
//! Each stage owns a fixed window of the job's overall 0-100 progress:
//! Separation 0-33, Transcription 33-66, Chords 66-100. Stages report a local
//! 0-100 value which is mapped into their window and written to the job
//! store together with the stage and a status message.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::JobRepository;
use crate::error::PipelineResult;
use crate::models::{JobStatus, Stage};

/// Receiver of local progress updates from a long-running step
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// `percent` is local to the caller (0-100)
    async fn report(&self, percent: u8, message: &str);
}

/// Map a stage-local percentage into overall job progress
pub fn overall_progress(stage: Stage, local: u8) -> u8 {
    let (start, end) = stage.progress_window();
    let local = local.min(100) as u32;
    let overall = start as u32 + (end as u32 - start as u32) * local / 100;
    overall.min(100) as u8
}

/// Writes one job's lifecycle and progress through to the job store
#[derive(Clone)]
pub struct ProgressCoordinator {
    store: Arc<dyn JobRepository>,
    job_id: Uuid,
}

impl ProgressCoordinator {
    pub fn new(store: Arc<dyn JobRepository>, job_id: Uuid) -> Self {
        Self { store, job_id }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Queued → Processing
    pub async fn start_job(&self) -> PipelineResult<()> {
        self.store
            .update_status(self.job_id, JobStatus::Processing, None)
            .await?;
        tracing::info!(job_id = %self.job_id, "Job started");
        Ok(())
    }

    /// Record stage-local progress
    pub async fn report_stage(&self, stage: Stage, local: u8, message: &str) -> PipelineResult<()> {
        let overall = overall_progress(stage, local);
        self.store
            .update_stage(self.job_id, stage, overall, message)
            .await?;
        tracing::info!(
            job_id = %self.job_id,
            stage = %stage,
            stage_progress = local,
            progress = overall,
            "{}",
            message
        );
        Ok(())
    }

    pub async fn complete_job(&self) -> PipelineResult<()> {
        self.store
            .update_status(self.job_id, JobStatus::Completed, None)
            .await?;
        tracing::info!(job_id = %self.job_id, "Job completed");
        Ok(())
    }

    /// Mark the job failed; progress stays where it was
    pub async fn fail_job(&self, message: &str) -> PipelineResult<()> {
        self.store
            .update_status(self.job_id, JobStatus::Failed, Some(message))
            .await?;
        tracing::error!(job_id = %self.job_id, error = %message, "Job failed");
        Ok(())
    }

    /// Progress sink scoped to one stage
    pub fn stage_reporter(&self, stage: Stage) -> StageReporter {
        StageReporter {
            coordinator: self.clone(),
            stage,
        }
    }
}

/// [`ProgressSink`] that reports into one stage's window
///
/// Store errors are logged and dropped: a missed progress update never
/// fails the stage.
#[derive(Clone)]
pub struct StageReporter {
    coordinator: ProgressCoordinator,
    stage: Stage,
}

impl StageReporter {
    /// Like [`ProgressSink::report`] but surfaces store errors
    pub async fn checkpoint(&self, percent: u8, message: &str) -> PipelineResult<()> {
        self.coordinator.report_stage(self.stage, percent, message).await
    }
}

#[async_trait]
impl ProgressSink for StageReporter {
    async fn report(&self, percent: u8, message: &str) {
        if let Err(e) = self.checkpoint(percent, message).await {
            tracing::warn!(
                job_id = %self.coordinator.job_id,
                stage = %self.stage,
                error = %e,
                "Progress update dropped"
            );
        }
    }
}

/// Forwards a sub-step's 0-100 into `[start, end]` of another sink
pub struct ScaledProgress<'a> {
    inner: &'a dyn ProgressSink,
    start: u8,
    end: u8,
}

impl<'a> ScaledProgress<'a> {
    pub fn new(inner: &'a dyn ProgressSink, start: u8, end: u8) -> Self {
        let start = start.min(100);
        Self {
            inner,
            start,
            end: end.clamp(start, 100),
        }
    }

    fn scale(&self, percent: u8) -> u8 {
        let span = (self.end - self.start) as u32;
        (self.start as u32 + span * percent.min(100) as u32 / 100) as u8
    }
}

#[async_trait]
impl<'a> ProgressSink for ScaledProgress<'a> {
    async fn report(&self, percent: u8, message: &str) {
        self.inner.report(self.scale(percent), message).await;
    }
}

/// Sink that discards updates
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _percent: u8, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_overall_progress_windows() {
        assert_eq!(overall_progress(Stage::Separation, 0), 0);
        assert_eq!(overall_progress(Stage::Separation, 100), 33);
        assert_eq!(overall_progress(Stage::Transcription, 0), 33);
        assert_eq!(overall_progress(Stage::Transcription, 50), 49);
        assert_eq!(overall_progress(Stage::Transcription, 100), 66);
        assert_eq!(overall_progress(Stage::Chords, 50), 83);
        assert_eq!(overall_progress(Stage::Chords, 100), 100);
    }

    #[test]
    fn test_overall_progress_clamps_local() {
        assert_eq!(overall_progress(Stage::Chords, 250), 100);
    }

    #[test]
    fn test_overall_progress_is_monotonic_across_stages() {
        let mut last = 0;
        for stage in Stage::ALL {
            for local in 0..=100 {
                let overall = overall_progress(stage, local);
                assert!(overall >= last, "{} {} went backwards", stage, local);
                last = overall;
            }
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(u8, String)>>);

    #[async_trait]
    impl ProgressSink for Recorder {
        async fn report(&self, percent: u8, message: &str) {
            self.0.lock().unwrap().push((percent, message.to_string()));
        }
    }

    #[tokio::test]
    async fn test_scaled_progress_maps_into_window() {
        let recorder = Recorder::default();
        let scaled = ScaledProgress::new(&recorder, 20, 70);

        scaled.report(0, "start").await;
        scaled.report(50, "half").await;
        scaled.report(100, "done").await;

        let seen: Vec<u8> = recorder.0.lock().unwrap().iter().map(|(p, _)| *p).collect();
        assert_eq!(seen, vec![20, 45, 70]);
    }
}
