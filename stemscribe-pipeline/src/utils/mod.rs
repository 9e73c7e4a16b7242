//! Utility modules for the stemscribe pipeline

pub mod audio_io;
pub mod db_retry;

pub use audio_io::{decode_audio_file, resample, write_wav};
pub use db_retry::retry_on_lock;
