//! Chord-model input from separated stems
//!
//! The `instrumental` stem is used as is when present. Otherwise `bass` and
//! `other` are mixed with normalised weights. The result is optionally peak
//! normalised.

use crate::error::{PipelineError, PipelineResult};
use crate::models::{MonoBuffer, StemSet};
use stemscribe_common::config::ChordConfig;

pub const INSTRUMENTAL_STEM: &str = "instrumental";
pub const BASS_STEM: &str = "bass";
pub const OTHER_STEM: &str = "other";

#[derive(Debug, Clone)]
pub struct StemMixer {
    bass_weight: f32,
    other_weight: f32,
    normalize: bool,
    peak_db: f32,
}

impl Default for StemMixer {
    fn default() -> Self {
        Self::new(&ChordConfig::default())
    }
}

impl StemMixer {
    pub fn new(config: &ChordConfig) -> Self {
        Self {
            bass_weight: config.bass_weight,
            other_weight: config.other_weight,
            normalize: config.normalize_mix,
            peak_db: config.peak_normalize_db,
        }
    }

    /// Build a mono mix from `stems`
    pub fn mix(&self, stems: &StemSet) -> PipelineResult<MonoBuffer> {
        if let Some(instrumental) = stems.get(INSTRUMENTAL_STEM) {
            tracing::info!("Using instrumental stem directly");
            let mut mono = instrumental.to_mono();
            self.peak_normalize(&mut mono.samples);
            return Ok(mono);
        }

        let parts: Vec<(MonoBuffer, f32)> = [(BASS_STEM, self.bass_weight), (OTHER_STEM, self.other_weight)]
            .into_iter()
            .filter_map(|(name, weight)| stems.get(name).map(|s| (s.to_mono(), weight)))
            .collect();

        let Some((first, _)) = parts.first() else {
            return Err(PipelineError::Audio(format!(
                "no usable stems for chord input (need '{}', '{}' or '{}')",
                INSTRUMENTAL_STEM, BASS_STEM, OTHER_STEM
            )));
        };

        let sample_rate = first.sample_rate;
        if let Some((mismatch, _)) = parts.iter().find(|(p, _)| p.sample_rate != sample_rate) {
            return Err(PipelineError::Audio(format!(
                "stem sample rate mismatch: {} Hz vs {} Hz",
                sample_rate, mismatch.sample_rate
            )));
        }

        let total_weight: f32 = parts.iter().map(|(_, w)| w).sum();
        if total_weight <= 0.0 {
            return Err(PipelineError::Audio("stem mix weights sum to zero".to_string()));
        }

        let length = parts.iter().map(|(p, _)| p.samples.len()).min().unwrap_or(0);
        let mut mixed = vec![0.0f32; length];
        for (part, weight) in &parts {
            let gain = weight / total_weight;
            for (out, sample) in mixed.iter_mut().zip(part.samples.iter()) {
                *out += sample * gain;
            }
        }

        self.peak_normalize(&mut mixed);
        tracing::info!(
            stems = parts.len(),
            samples = length,
            sample_rate,
            "Mixed stems for chord detection"
        );
        Ok(MonoBuffer::new(mixed, sample_rate))
    }

    fn peak_normalize(&self, samples: &mut [f32]) {
        if !self.normalize {
            return;
        }
        let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
        if peak > 0.0 {
            let gain = 10f32.powf(self.peak_db / 20.0) / peak;
            for s in samples.iter_mut() {
                *s *= gain;
            }
        }
    }
}
