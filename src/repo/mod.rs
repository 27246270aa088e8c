//! Durable files shared between the pipeline and its readers

pub mod artifact;
pub mod atomic;
pub mod chores;
pub mod intensity_log;
pub mod progress;

pub use artifact::ArtifactWriter;
pub use chores::{ChoreSource, CsvChoreSource};
pub use intensity_log::{IntensityLog, IntensitySample};
pub use progress::{DailyCarbonProgress, JsonProgressStore, ProgressStore};
