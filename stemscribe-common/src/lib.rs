//! # stemscribe common library
//!
//! Shared code for the stemscribe crates:
//! - Error types
//! - Configuration loading (TOML + environment)
//! - Crossfade curve definitions
//! - Pitch / note-name conversions

pub mod config;
pub mod error;
pub mod fade_curves;
pub mod music;

pub use error::{Error, Result};
pub use fade_curves::FadeCurve;
