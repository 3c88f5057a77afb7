//! Error types for pscan.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for pscan.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write '{}': {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Input file '{}' is empty", .0.display())]
    EmptyInput(PathBuf),

    #[error("Target must be exactly one byte, got {0:?}")]
    InvalidTarget(String),

    #[error("Invalid worker count: {0}. Must be a positive integer.")]
    InvalidPartitionRequest(String),

    #[error("Failed to spawn worker {id}: {source}")]
    SpawnFailure {
        id: usize,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("Failed to install signal handlers: {0}")]
    SignalSetup(#[source] nix::errno::Errno),

    #[error("Timeout waiting for data on channel {index} after {}ms", timeout.as_millis())]
    ChannelTimeout { index: usize, timeout: Duration },

    #[error("Channel {index} closed before a result arrived")]
    ChannelClosed { index: usize },

    #[error("Failed to read from channel {index}: {source}")]
    Channel {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker {id} (pid {pid}) {reason}")]
    WorkerAbnormalTermination { id: usize, pid: i32, reason: String },

    #[error("Could not confirm termination of worker {id} (pid {pid}): {message}")]
    ReapFailure { id: usize, pid: i32, message: String },
}

/// Failure modes of a single result channel receive.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("no data before the deadline")]
    Timeout,

    #[error("channel closed before the full payload arrived")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ChannelError {
    /// Attach the channel index, producing the job-level error.
    pub fn at(self, index: usize, timeout: Duration) -> ScanError {
        match self {
            Self::Timeout => ScanError::ChannelTimeout { index, timeout },
            Self::Closed => ScanError::ChannelClosed { index },
            Self::Io(source) => ScanError::Channel { index, source },
        }
    }
}

/// Result type alias for pscan operations.
pub type Result<T> = std::result::Result<T, ScanError>;
