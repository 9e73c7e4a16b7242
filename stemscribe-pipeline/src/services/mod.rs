//! Pipeline services
//!
//! Pure transforms (stitching, pitch cleanup, segmentation, key, chords,
//! stem mix), progress reporting, the job scheduler and the orchestrator
//! that ties them to the job store.

pub mod chord_builder;
pub mod chunk_stitcher;
pub mod key_estimator;
pub mod note_segmenter;
pub mod orchestrator;
pub mod pitch_cleaner;
pub mod progress;
pub mod scheduler;
pub mod stem_mixer;
pub mod tempo;

pub use chord_builder::{ChordBuilderConfig, ChordEventBuilder};
pub use chunk_stitcher::ChunkStitcher;
pub use key_estimator::KeyEstimator;
pub use note_segmenter::NoteSegmenter;
pub use orchestrator::{JobDirs, PipelineModels, PipelineOrchestrator};
pub use pitch_cleaner::PitchCleaner;
pub use progress::{NoProgress, ProgressCoordinator, ProgressSink, ScaledProgress, StageReporter};
pub use scheduler::{JobScheduler, JobTask, SchedulerStatus};
pub use stem_mixer::StemMixer;
pub use tempo::TempoChain;
