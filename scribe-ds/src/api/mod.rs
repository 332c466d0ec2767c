//! HTTP API handlers for scribe-ds

pub mod auth;
pub mod catalog;
pub mod health;
pub mod training;
pub mod work;

pub use auth::require_access_key;
pub use catalog::catalog_routes;
pub use health::health_routes;
pub use training::training_routes;
pub use work::work_routes;
