//! # Scribe Worker
//!
//! Transcription worker for scribe-ds: pulls untranscribed episodes, runs an
//! external transcriber on the cached audio, and uploads the result.

pub mod backoff;
pub mod client;
pub mod config;
pub mod transcriber;
pub mod worker;

pub use config::WorkerConfig;
pub use worker::{JobOutcome, Worker, WorkerError, WorkerStats};
