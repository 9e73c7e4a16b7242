//! Crossfade curves for chunk reassembly
//!
//! Separated chunks overlap by a few seconds. The overlap is blended with a
//! complementary pair of curves so that `fade_in(t) + fade_out(t) == 1` at
//! every position, which keeps a signal crossfaded with itself unchanged.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Complementary crossfade curve used when stitching overlapping chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FadeCurve {
    /// Raised cosine (Hann half-window): v(t) = 0.5 × (1 - cos(π × t))
    ///
    /// Smooth at both ends, no slope discontinuity at the overlap edges.
    RaisedCosine,

    /// Linear: v(t) = t
    Linear,
}

impl FadeCurve {
    /// Calculate fade-in multiplier at given position
    ///
    /// # Arguments
    /// * `position` - Normalized position through fade (0.0 to 1.0)
    ///
    /// # Returns
    /// Gain applied to the incoming chunk (0.0 = silent, 1.0 = full)
    pub fn calculate_fade_in(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::RaisedCosine => 0.5 * (1.0 - (PI * t).cos()),
            FadeCurve::Linear => t,
        }
    }

    /// Calculate fade-out multiplier at given position
    ///
    /// Gain applied to the accumulated signal (1.0 at start, 0.0 at end).
    pub fn calculate_fade_out(&self, position: f32) -> f32 {
        let t = position.clamp(0.0, 1.0);

        match self {
            FadeCurve::RaisedCosine => 0.5 * (1.0 + (PI * t).cos()),
            FadeCurve::Linear => 1.0 - t,
        }
    }

    /// Gain pair `(fade_out, fade_in)` for sample `index` of an overlap of `len` samples
    ///
    /// Positions are spaced linearly with both endpoints included, so the
    /// first overlap sample is pure outgoing signal and the last is pure
    /// incoming signal. A one-sample overlap sits at position 0.
    pub fn gains_at(&self, index: usize, len: usize) -> (f32, f32) {
        let position = if len > 1 {
            index as f32 / (len - 1) as f32
        } else {
            0.0
        };
        (self.calculate_fade_out(position), self.calculate_fade_in(position))
    }

    /// Canonical config string
    pub fn as_str(&self) -> &'static str {
        match self {
            FadeCurve::RaisedCosine => "raised_cosine",
            FadeCurve::Linear => "linear",
        }
    }

    /// Get all available curve variants
    pub fn all_variants() -> &'static [FadeCurve] {
        &[FadeCurve::RaisedCosine, FadeCurve::Linear]
    }
}

impl Default for FadeCurve {
    fn default() -> Self {
        FadeCurve::RaisedCosine
    }
}

impl std::fmt::Display for FadeCurve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
