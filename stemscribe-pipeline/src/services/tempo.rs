//! Tempo estimation fallback chain

use crate::backends::TempoEstimator;
use std::path::Path;
use std::sync::Arc;

pub const MIN_TEMPO_BPM: f64 = 40.0;
pub const MAX_TEMPO_BPM: f64 = 240.0;

/// Beat intervals outside (0.2 s, 2.0 s) are ignored
const MIN_BEAT_INTERVAL: f64 = 0.2;
const MAX_BEAT_INTERVAL: f64 = 2.0;

pub fn is_plausible_tempo(bpm: f64) -> bool {
    bpm.is_finite() && (MIN_TEMPO_BPM..=MAX_TEMPO_BPM).contains(&bpm)
}

/// Tempo from beat times: 60 / median of the plausible inter-beat intervals
pub fn tempo_from_beats(beat_times: &[f64]) -> Option<f64> {
    let mut intervals: Vec<f64> = beat_times
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|&d| d > MIN_BEAT_INTERVAL && d < MAX_BEAT_INTERVAL)
        .collect();
    if intervals.is_empty() {
        return None;
    }

    intervals.sort_by(|a, b| a.total_cmp(b));
    let mid = intervals.len() / 2;
    let median = if intervals.len() % 2 == 0 {
        (intervals[mid - 1] + intervals[mid]) / 2.0
    } else {
        intervals[mid]
    };

    let bpm = 60.0 / median;
    is_plausible_tempo(bpm).then_some(bpm)
}

/// Tries estimators in order and falls back to a default tempo
#[derive(Clone)]
pub struct TempoChain {
    estimators: Vec<Arc<dyn TempoEstimator>>,
    default_bpm: f64,
}

impl TempoChain {
    pub fn new(estimators: Vec<Arc<dyn TempoEstimator>>, default_bpm: f64) -> Self {
        Self {
            estimators,
            default_bpm,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.estimators.is_empty()
    }

    /// First plausible estimate, or the default
    pub async fn detect(&self, audio_path: &Path) -> f64 {
        for estimator in &self.estimators {
            match estimator.detect(audio_path).await {
                Some(bpm) if is_plausible_tempo(bpm) => {
                    tracing::info!(estimator = %estimator.name(), bpm, "Detected tempo");
                    return bpm;
                }
                Some(bpm) => {
                    tracing::warn!(estimator = %estimator.name(), bpm, "Tempo out of range, trying next estimator");
                }
                None => {
                    tracing::debug!(estimator = %estimator.name(), "Tempo estimator gave no result");
                }
            }
        }

        tracing::warn!(default_bpm = self.default_bpm, "All tempo estimators failed, using default tempo");
        self.default_bpm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        value: Option<f64>,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(value: Option<f64>) -> Arc<Self> {
            Arc::new(Self {
                value,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TempoEstimator for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn detect(&self, _audio_path: &Path) -> Option<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.value
        }
    }

    #[test]
    fn test_tempo_from_regular_beats() {
        let beats: Vec<f64> = (0..9).map(|i| i as f64 * 0.5).collect();
        assert!((tempo_from_beats(&beats).unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_from_beats_ignores_outlier_intervals() {
        // 0.1 s and 3 s gaps are dropped; median of 0.6, 0.6, 0.5, 0.5 is 0.55
        let beats = [0.0, 0.6, 1.2, 1.3, 1.8, 4.8, 5.3];
        let bpm = tempo_from_beats(&beats).unwrap();
        assert!((bpm - 60.0 / 0.55).abs() < 1e-9);
    }

    #[test]
    fn test_tempo_from_beats_needs_intervals() {
        assert_eq!(tempo_from_beats(&[]), None);
        assert_eq!(tempo_from_beats(&[1.0]), None);
        assert_eq!(tempo_from_beats(&[0.0, 0.1, 0.2]), None);
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_first_plausible() {
        let failing = Fixed::new(None);
        let too_fast = Fixed::new(Some(300.0));
        let good = Fixed::new(Some(96.0));
        let unused = Fixed::new(Some(140.0));

        let estimators: Vec<Arc<dyn TempoEstimator>> = vec![
            failing.clone() as Arc<dyn TempoEstimator>,
            too_fast as Arc<dyn TempoEstimator>,
            good as Arc<dyn TempoEstimator>,
            unused.clone() as Arc<dyn TempoEstimator>,
        ];
        let chain = TempoChain::new(estimators, 120.0);
        assert_eq!(chain.detect(Path::new("song.wav")).await, 96.0);
        assert_eq!(unused.calls.load(Ordering::SeqCst), 0);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_chain_default_when_nothing_usable() {
        let slow: Arc<dyn TempoEstimator> = Fixed::new(Some(20.0));
        let chain = TempoChain::new(vec![slow], 120.0);
        assert_eq!(chain.detect(Path::new("song.wav")).await, 120.0);

        let empty = TempoChain::new(Vec::new(), 110.0);
        assert!(empty.is_empty());
        assert_eq!(empty.detect(Path::new("song.wav")).await, 110.0);
    }
}
