//! Grid carbon-intensity pipeline: live generation ingest, rolling cache,
//! 24-hour forecast, low-carbon window advice and per-user daily savings.

pub mod cache;
pub mod config;
pub mod controller;
pub mod domain;
pub mod emissions;
pub mod error;
pub mod forecast;
pub mod ingest;
pub mod ml;
pub mod recommendation;
pub mod repo;
pub mod savings;
pub mod telemetry;

pub use error::{PipelineError, Result};
