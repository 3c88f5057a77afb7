//! Result file rendering and writing.

pub mod json;
pub mod text;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, ScanError};

/// Result file format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// One sentence (default).
    #[default]
    Text,
    /// A pretty-printed [`ScanReport`].
    Json,
}

/// Everything the result file can say about a finished scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub input: PathBuf,
    /// The target as a one-character string.
    pub target: String,
    pub occurrences: u64,
    pub workers: u32,
    pub elapsed_ms: u64,
}

impl ScanReport {
    pub fn new(input: &Path, target: u8, occurrences: u64, workers: u32, elapsed_ms: u64) -> Self {
        Self {
            input: input.to_path_buf(),
            target: char::from(target).to_string(),
            occurrences,
            workers,
            elapsed_ms,
        }
    }

    pub fn render(&self, format: OutputFormat) -> String {
        match format {
            OutputFormat::Text => text::render(self),
            OutputFormat::Json => json::render(self),
        }
    }
}

/// Create or truncate `path` and write `contents` to it.
pub fn write_result(path: &Path, contents: &str) -> Result<()> {
    std::fs::write(path, contents).map_err(|source| ScanError::Write {
        path: path.to_path_buf(),
        source,
    })
}
