//! # Scribe Common Library
//!
//! Shared code for the transcription coordination services:
//! - Work item catalog and lifecycle transitions
//! - Allocation of untranscribed work to workers
//! - Training session cursors with pluggable state backends
//! - Database initialization and the connection proxy
//! - API request/response types and access-key checks
//! - Configuration loading

pub mod allocation;
pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod session;
pub mod urls;

pub use error::{Error, Result};
