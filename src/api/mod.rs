//! HTTP API handlers

pub mod files;
pub mod health;
pub mod jobs;

pub use files::file_routes;
pub use health::health_routes;
pub use jobs::job_routes;
