//! Model and audio collaborators
//!
//! The pipeline never runs inference itself. Source separation, pitch
//! tracking, chord recognition and tempo estimation sit behind these traits;
//! [`external`] backs them with configured external commands and tests use
//! in-process fakes.

pub mod external;

pub use external::{
    ExternalChordModel, ExternalCommand, ExternalModelError, ExternalPitchModel,
    ExternalSeparationModel, ExternalTempoEstimator,
};

use crate::error::{PipelineError, PipelineResult};
use crate::models::{AudioBuffer, ChunkBounds, MonoBuffer, PitchFrame, RawChordFrame, StemSet};
use crate::services::progress::ProgressSink;
use crate::utils::audio_io;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Splits audio into named stems
#[async_trait]
pub trait SeparationModel: Send + Sync {
    fn name(&self) -> &str;

    /// Separate one chunk
    ///
    /// `audio` holds only the chunk's samples; `chunk` locates it within the
    /// whole input. Every returned stem must have the chunk's length and
    /// sample rate.
    async fn separate(
        &self,
        audio: &AudioBuffer,
        chunk: ChunkBounds,
        progress: &dyn ProgressSink,
    ) -> PipelineResult<StemSet>;
}

/// Frame-level fundamental frequency tracker
#[async_trait]
pub trait PitchModel: Send + Sync {
    fn name(&self) -> &str;

    /// Pitch frames at a fixed hop, time ordered
    async fn detect(&self, audio: &MonoBuffer, progress: &dyn ProgressSink) -> PipelineResult<Vec<PitchFrame>>;
}

/// Frame-level chord recogniser
#[async_trait]
pub trait ChordModel: Send + Sync {
    fn name(&self) -> &str;

    /// Chord label frames at uniform spacing, time ordered
    async fn predict(&self, audio: &MonoBuffer, progress: &dyn ProgressSink) -> PipelineResult<Vec<RawChordFrame>>;
}

/// One tempo estimation method
///
/// `None` means the method is unavailable or produced nothing usable.
#[async_trait]
pub trait TempoEstimator: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, audio_path: &Path) -> Option<f64>;
}

/// Audio file access
#[async_trait]
pub trait AudioIo: Send + Sync {
    /// Decode `path`, resampled to `target_rate` when given
    async fn load(&self, path: &Path, target_rate: Option<u32>) -> PipelineResult<AudioBuffer>;

    async fn write_wav(&self, path: &Path, buffer: &AudioBuffer) -> PipelineResult<()>;
}

/// [`AudioIo`] on the local filesystem (symphonia decode, rubato resample, hound write)
#[derive(Debug, Clone, Copy, Default)]
pub struct FileAudioIo;

#[async_trait]
impl AudioIo for FileAudioIo {
    async fn load(&self, path: &Path, target_rate: Option<u32>) -> PipelineResult<AudioBuffer> {
        let path: PathBuf = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let buffer = audio_io::decode_audio_file(&path)?;
            match target_rate {
                Some(rate) => audio_io::resample(buffer, rate),
                None => Ok(buffer),
            }
        })
        .await
        .map_err(|e| PipelineError::Audio(format!("Decode task failed: {}", e)))?
    }

    async fn write_wav(&self, path: &Path, buffer: &AudioBuffer) -> PipelineResult<()> {
        let path = path.to_path_buf();
        let buffer = buffer.clone();
        tokio::task::spawn_blocking(move || audio_io::write_wav(&path, &buffer))
            .await
            .map_err(|e| PipelineError::Audio(format!("WAV write task failed: {}", e)))?
    }
}

/// Stand-in for a model with no configured command
///
/// Every call fails, so a job that needs the model fails in that stage.
#[derive(Debug, Clone)]
pub struct UnconfiguredModel {
    kind: &'static str,
}

impl UnconfiguredModel {
    pub fn new(kind: &'static str) -> Self {
        Self { kind }
    }

    fn error(&self) -> PipelineError {
        PipelineError::Model(format!("no {} model command configured", self.kind))
    }
}

#[async_trait]
impl SeparationModel for UnconfiguredModel {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn separate(&self, _: &AudioBuffer, _: ChunkBounds, _: &dyn ProgressSink) -> PipelineResult<StemSet> {
        Err(self.error())
    }
}

#[async_trait]
impl PitchModel for UnconfiguredModel {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn detect(&self, _: &MonoBuffer, _: &dyn ProgressSink) -> PipelineResult<Vec<PitchFrame>> {
        Err(self.error())
    }
}

#[async_trait]
impl ChordModel for UnconfiguredModel {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn predict(&self, _: &MonoBuffer, _: &dyn ProgressSink) -> PipelineResult<Vec<RawChordFrame>> {
        Err(self.error())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_audio_io_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        let samples: Vec<f32> = (0..800).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let buffer = AudioBuffer::new(vec![samples.clone(), samples], 8000);

        let io = FileAudioIo;
        io.write_wav(&path, &buffer).await.unwrap();
        let loaded = io.load(&path, None).await.unwrap();

        assert_eq!(loaded.sample_rate, 8000);
        assert_eq!(loaded.channel_count(), 2);
        assert_eq!(loaded.frames(), 800);
    }

    #[tokio::test]
    async fn test_unconfigured_model_fails() {
        let model = UnconfiguredModel::new("pitch");
        let audio = MonoBuffer::new(vec![0.0; 16], 16000);
        let err = PitchModel::detect(&model, &audio, &crate::services::progress::NoProgress)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Model error: no pitch model command configured");
    }

    #[tokio::test]
    async fn test_load_missing_file_is_audio_error() {
        let result = FileAudioIo.load(Path::new("/nonexistent/song.mp3"), Some(16000)).await;
        assert!(result.is_err());
    }
}
