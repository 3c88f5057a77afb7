//! Command-line interface definitions using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::error::{Result, ScanError};
use crate::logging::LogFormat;
use crate::output::OutputFormat;
use crate::scan::{DEFAULT_COLLECT_TIMEOUT, DEFAULT_WORKERS};

/// Count how often one byte occurs in a file, using forked worker processes.
#[derive(Parser, Debug)]
#[command(name = "pscan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// File to scan.
    pub input: PathBuf,

    /// File to write the result to (created or truncated).
    pub output: PathBuf,

    /// The byte to count, given as a single character.
    pub target: String,

    /// Number of worker processes.
    #[arg(short = 'P', long = "workers", env = "P", default_value_t = DEFAULT_WORKERS.to_string())]
    pub workers: String,

    /// Seconds to wait for each worker's result.
    #[arg(long, env = "PSCAN_TIMEOUT_SECS", default_value_t = DEFAULT_COLLECT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Per-byte delay inside workers, in microseconds.
    #[arg(long, env = "PSCAN_THROTTLE_US", hide = true)]
    pub throttle_us: Option<u64>,

    /// Result file format.
    #[arg(short, long, value_enum, env = "PSCAN_FORMAT", default_value_t = OutputFormatArg::Text)]
    pub format: OutputFormatArg,

    /// Enable verbose logging (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress progress and summary output; only errors are printed.
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output.
    #[arg(long, env = "NO_COLOR")]
    pub no_color: bool,

    /// Diagnostic log format (pretty, compact, json).
    #[arg(long, value_parser = clap::value_parser!(LogFormat))]
    pub log_format: Option<LogFormat>,

    /// Also write diagnostics to this file.
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

/// Result format argument.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormatArg {
    /// One English sentence.
    #[default]
    Text,
    /// A JSON report.
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Text => OutputFormat::Text,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

impl Cli {
    /// The target as a byte. Anything but exactly one byte is rejected.
    pub fn target_byte(&self) -> Result<u8> {
        match self.target.as_bytes() {
            [byte] => Ok(*byte),
            _ => Err(ScanError::InvalidTarget(self.target.clone())),
        }
    }

    pub fn collect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn throttle(&self) -> Option<Duration> {
        self.throttle_us
            .filter(|&us| us > 0)
            .map(Duration::from_micros)
    }
}
