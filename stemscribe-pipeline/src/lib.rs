//! stemscribe pipeline library
//!
//! Turns a song into separated stems, a vocal melody transcription and a
//! chord progression. Jobs are persisted in SQLite and run on a bounded
//! worker pool; inference models are external collaborators behind the
//! traits in [`backends`].

pub mod backends;
pub mod db;
pub mod error;
pub mod export;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{PipelineError, PipelineResult, SchedulerError};
