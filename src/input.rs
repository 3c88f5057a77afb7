//! Loading the scanned file.

use std::path::Path;

use crate::error::{Result, ScanError};

/// Read the whole file into memory. Empty files are rejected.
pub fn load_buffer(path: &Path) -> Result<Vec<u8>> {
    let buffer = std::fs::read(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if buffer.is_empty() {
        return Err(ScanError::EmptyInput(path.to_path_buf()));
    }
    tracing::debug!(path = %path.display(), bytes = buffer.len(), "Loaded input");
    Ok(buffer)
}
