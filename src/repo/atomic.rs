//! Write-then-rename helpers so readers never observe a partially written file.

use std::io::Write;
use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::{PipelineError, Result};

/// Replaces `path` with `bytes`. The temp file is created in the target
/// directory so the final rename never crosses a filesystem boundary.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PipelineError::persistence(dir, e))?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::persistence(dir, e))?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| PipelineError::persistence(tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| PipelineError::persistence(path, e.error))?;
    Ok(())
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

/// `Ok(None)` when the file does not exist; any other failure is an error
/// the caller decides how to treat.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PipelineError::persistence(path, e)),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        value: u32,
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/state.json");
        let sample = Sample {
            name: "north".into(),
            value: 6,
        };
        write_json_atomic(&path, &sample).unwrap();
        let loaded: Option<Sample> = read_json(&path).unwrap();
        assert_eq!(loaded, Some(sample));

        // Only the target remains in the directory
        let entries: Vec<_> = std::fs::read_dir(path.parent().unwrap()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_read_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Sample> = read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_read_corrupt_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.json");
        std::fs::write(&path, b"{not json").unwrap();
        let loaded: Result<Option<Sample>> = read_json(&path);
        assert!(matches!(loaded, Err(PipelineError::Serialization(_))));
    }

    #[test]
    fn test_overwrite_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        write_atomic(&path, b"a much longer first version").unwrap();
        write_atomic(&path, b"short").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"short");
    }
}
