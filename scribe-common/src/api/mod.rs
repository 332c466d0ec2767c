//! Shared HTTP API functionality
//!
//! Contains only framework-independent pieces: the access-key check and the
//! request/response types shared by the data server and the worker client.

pub mod auth;
pub mod types;

pub use auth::AccessKey;
pub use types::*;
