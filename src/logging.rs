//! Diagnostic logging for pscan.
//!
//! Diagnostics go to stderr (and optionally a file) so they never mix with the
//! result summary on stdout.
//!
//! # Environment Variables
//!
//! - `PSCAN_LOG` - Log filter (overrides RUST_LOG)
//! - `PSCAN_LOG_LEVEL` - Log level: error, warn, info, debug, trace
//! - `PSCAN_LOG_FORMAT` - Output format: pretty, compact, json
//! - `PSCAN_LOG_FILE` - Path to log file (in addition to stderr)
//! - `RUST_LOG` - Standard Rust log filter (fallback)
//!
//! Command-line verbosity flags win over all of these.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, MakeWriter, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-field format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "full" => Ok(Self::Pretty),
            "compact" => Ok(Self::Compact),
            "json" => Ok(Self::Json),
            _ => Err(format!(
                "Unknown log format: '{}'. Valid options: pretty, compact, json",
                s
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Compact => write!(f, "compact"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Base log level (default: WARN)
    pub level: Level,
    pub format: LogFormat,
    /// Extra log file (None = stderr only)
    pub file_path: Option<PathBuf>,
    /// Log span timing on close
    pub span_events: bool,
    /// Custom filter string (overrides level if set)
    pub filter: Option<String>,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Pretty,
            file_path: None,
            span_events: false,
            filter: None,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LogConfig {
    /// Map `-v`/`-q` flags to a filter.
    ///
    /// No flags leaves the filter unset so environment variables can apply.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let level = match (quiet, verbose) {
            (true, _) => Some(Level::ERROR),
            (false, 0) => None,
            (false, 1) => Some(Level::INFO),
            (false, 2) => Some(Level::DEBUG),
            (false, _) => Some(Level::TRACE),
        };
        let config = Self::default().with_span_events(verbose >= 2);
        match level {
            Some(level) => config
                .with_level(level)
                .with_filter(level.to_string().to_lowercase()),
            None => config,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_file(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.span_events = enabled;
        self
    }

    pub fn with_filter(mut self, filter: String) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Apply environment variable overrides.
    ///
    /// A filter already set from the command line is kept. Otherwise
    /// `PSCAN_LOG`, then `RUST_LOG`, then `PSCAN_LOG_LEVEL` are consulted.
    pub fn with_env_overrides(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    fn with_env_lookup(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if self.filter.is_none() {
            self.filter = var("PSCAN_LOG").or_else(|| var("RUST_LOG"));
        }

        if self.filter.is_none()
            && let Some(level_str) = var("PSCAN_LOG_LEVEL")
        {
            self.level = parse_level(&level_str).unwrap_or(self.level);
        }

        if let Some(format) = var("PSCAN_LOG_FORMAT")
            && let Ok(f) = format.parse()
        {
            self.format = f;
        }

        if let Some(path) = var("PSCAN_LOG_FILE") {
            self.file_path = Some(PathBuf::from(path));
        }

        self
    }

    fn build_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string().to_lowercase());
        match self.filter {
            Some(ref filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| {
                eprintln!("Warning: Invalid log filter '{}', using default", filter);
                fallback()
            }),
            None => fallback(),
        }
    }

    fn layer<W>(&self, writer: W, ansi: bool) -> BoxedLayer
    where
        W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
    {
        let span_events = if self.span_events {
            FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let layer = fmt::layer()
            .with_writer(writer)
            .with_ansi(ansi)
            .with_span_events(span_events)
            .with_target(self.show_target);

        match self.format {
            LogFormat::Json => layer.json().boxed(),
            LogFormat::Compact => layer
                .compact()
                .with_thread_ids(self.show_thread_ids)
                .boxed(),
            LogFormat::Pretty => layer.with_thread_ids(self.show_thread_ids).boxed(),
        }
    }
}

fn parse_level(s: &str) -> Option<Level> {
    match s.to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}

/// Split a log path into the directory and file name the appender wants.
fn appender_target(path: &Path) -> (&Path, &str) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("pscan.log");
    (parent, file_name)
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(config: LogConfig) {
    let mut layers = vec![config.layer(std::io::stderr, true)];
    if let Some(path) = config.file_path.as_deref() {
        let (dir, file_name) = appender_target(path);
        layers.push(config.layer(tracing_appender::rolling::never(dir, file_name), false));
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(config.build_filter())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("full".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("invalid".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("error"), Some(Level::ERROR));
        assert_eq!(parse_level("warning"), Some(Level::WARN));
        assert_eq!(parse_level("INFO"), Some(Level::INFO));
        assert_eq!(parse_level("trace"), Some(Level::TRACE));
        assert_eq!(parse_level("invalid"), None);
    }

    #[test]
    fn test_log_config_defaults() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.file_path.is_none());
        assert!(config.filter.is_none());
        assert!(!config.span_events);
    }

    #[test]
    fn test_from_verbosity() {
        assert!(LogConfig::from_verbosity(0, false).filter.is_none());
        assert_eq!(
            LogConfig::from_verbosity(1, false).filter.as_deref(),
            Some("info")
        );
        let debug = LogConfig::from_verbosity(2, false);
        assert_eq!(debug.filter.as_deref(), Some("debug"));
        assert!(debug.span_events);
        assert_eq!(
            LogConfig::from_verbosity(7, false).filter.as_deref(),
            Some("trace")
        );
        assert_eq!(
            LogConfig::from_verbosity(0, true).filter.as_deref(),
            Some("error")
        );
    }

    #[test]
    fn test_env_filter_precedence() {
        let config = LogConfig::default()
            .with_env_lookup(env(&[("PSCAN_LOG", "pscan=debug"), ("RUST_LOG", "trace")]));
        assert_eq!(config.filter.as_deref(), Some("pscan=debug"));

        let config = LogConfig::default().with_env_lookup(env(&[("RUST_LOG", "trace")]));
        assert_eq!(config.filter.as_deref(), Some("trace"));
    }

    #[test]
    fn test_cli_filter_beats_env() {
        let config = LogConfig::from_verbosity(1, false)
            .with_env_lookup(env(&[("PSCAN_LOG", "trace"), ("PSCAN_LOG_LEVEL", "debug")]));
        assert_eq!(config.filter.as_deref(), Some("info"));
        assert_eq!(config.level, Level::INFO);
    }

    #[test]
    fn test_env_level_format_and_file() {
        let config = LogConfig::default().with_env_lookup(env(&[
            ("PSCAN_LOG_LEVEL", "debug"),
            ("PSCAN_LOG_FORMAT", "json"),
            ("PSCAN_LOG_FILE", "/tmp/pscan-test.log"),
        ]));
        assert_eq!(config.level, Level::DEBUG);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.file_path, Some(PathBuf::from("/tmp/pscan-test.log")));
    }

    #[test]
    fn test_bad_env_values_are_ignored() {
        let config = LogConfig::default().with_env_lookup(env(&[
            ("PSCAN_LOG_LEVEL", "loud"),
            ("PSCAN_LOG_FORMAT", "xml"),
        ]));
        assert_eq!(config.level, Level::WARN);
        assert_eq!(config.format, LogFormat::Pretty);
    }

    #[test]
    fn test_appender_target() {
        assert_eq!(
            appender_target(Path::new("/var/log/pscan.log")),
            (Path::new("/var/log"), "pscan.log")
        );
        assert_eq!(
            appender_target(Path::new("scan.log")),
            (Path::new("."), "scan.log")
        );
    }
}
