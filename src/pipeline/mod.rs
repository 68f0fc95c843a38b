//! Conversion and tagging pipelines plus the progress estimator.

pub mod convert;
pub mod progress;
pub mod sidecars;
pub mod tagging;

pub use convert::ConversionPipeline;
pub use tagging::TaggingPipeline;
