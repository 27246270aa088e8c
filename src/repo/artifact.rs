use std::path::PathBuf;

use tracing::info;

use super::atomic::{read_json, write_json_atomic};
use crate::domain::{CarbonIntensityArtifact, DebugArtifact};
use crate::error::Result;

/// Writes the client artifact and its debug companion, each replaced wholesale
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    output_path: PathBuf,
    debug_path: PathBuf,
}

impl ArtifactWriter {
    pub fn new(output_path: impl Into<PathBuf>, debug_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            debug_path: debug_path.into(),
        }
    }

    pub fn write(&self, artifact: &CarbonIntensityArtifact) -> Result<()> {
        write_json_atomic(&self.output_path, artifact)?;
        info!(
            path = %self.output_path.display(),
            status = ?artifact.status,
            forecast_len = artifact.forecast.len(),
            "artifact written"
        );
        Ok(())
    }

    pub fn write_debug(&self, artifact: &DebugArtifact) -> Result<()> {
        write_json_atomic(&self.debug_path, artifact)
    }

    pub fn read(&self) -> Result<Option<CarbonIntensityArtifact>> {
        read_json(&self.output_path)
    }

    pub fn read_debug(&self) -> Result<Option<DebugArtifact>> {
        read_json(&self.debug_path)
    }
}
