//! Error types for the pipeline
//!
//! Two channels carry failures: the job record (a Failed job with a readable
//! message) and the scheduler log. Nothing in here is ever returned to a
//! submitter once a job has been admitted.

use crate::models::Stage;
use thiserror::Error;
use uuid::Uuid;

/// Pipeline result type
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

/// Admission errors returned by the job scheduler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// Active job count has reached the configured ceiling
    #[error("Capacity exceeded: {active} of {capacity} job slots in use")]
    CapacityExceeded { active: usize, capacity: usize },

    /// A job with this id is already queued or running
    #[error("Job {0} is already active")]
    AlreadyActive(Uuid),

    /// Scheduler no longer accepts work
    #[error("Scheduler is shutting down")]
    ShuttingDown,
}

/// Pipeline error type
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Admission rejected
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A pipeline stage failed; terminal for the job
    #[error("{stage} stage failed: {message}")]
    StageFailure { stage: Stage, message: String },

    /// Model collaborator error (external command, bad output)
    #[error("Model error: {0}")]
    Model(String),

    /// Audio decode, resample or write error
    #[error("Audio error: {0}")]
    Audio(String),

    /// Result export error
    #[error("Export error: {0}")]
    Export(String),

    /// Job not found
    #[error("Job not found: {0}")]
    NotFound(Uuid),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// stemscribe-common error (database, config)
    #[error(transparent)]
    Common(#[from] stemscribe_common::Error),
}

impl PipelineError {
    /// Wrap any error as a failure of `stage`
    ///
    /// Errors that already are a stage failure keep their original stage.
    pub fn in_stage(self, stage: Stage) -> Self {
        match self {
            err @ PipelineError::StageFailure { .. } => err,
            other => PipelineError::StageFailure {
                stage,
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Export(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_stage_wraps_message() {
        let err = PipelineError::Model("exit code 1".to_string()).in_stage(Stage::Chords);
        match err {
            PipelineError::StageFailure { stage, message } => {
                assert_eq!(stage, Stage::Chords);
                assert_eq!(message, "Model error: exit code 1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_in_stage_keeps_original_stage() {
        let err = PipelineError::StageFailure {
            stage: Stage::Separation,
            message: "boom".to_string(),
        }
        .in_stage(Stage::Chords);
        assert!(matches!(
            err,
            PipelineError::StageFailure { stage: Stage::Separation, .. }
        ));
    }

    #[test]
    fn test_capacity_message() {
        let err = SchedulerError::CapacityExceeded { active: 3, capacity: 3 };
        assert_eq!(err.to_string(), "Capacity exceeded: 3 of 3 job slots in use");
    }
}
