//! Agent option-string parsing.
//!
//! Options arrive as a single underscore-delimited list of `key=value`
//! tokens (underscores because the launcher cannot pass semicolons through
//! the shell). Scope lists inside a token are pipe-delimited and normalized
//! to the `/` separator convention before use.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;
use crate::scope::normalize_scope;

pub const DEFAULT_OUTPUT_FILE: &str = "jcoz-output.csv";

/// Logging verbosity accepted by the `logging-level=` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" => Some(LogLevel::Off),
            "error" | "critical" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }

    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

/// Parsed profiler configuration.
///
/// `seed` and `speedup_override` have no option-string spelling; embedding
/// code (and tests) set them directly to make trials reproducible or to pin
/// the drawn speedup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilerOptions {
    /// Class-name prefixes to profile (required, `/`-separated form).
    pub search_scopes: Vec<String>,
    /// Class-name prefixes excluded from profiling.
    pub ignored_scopes: Vec<String>,
    /// Progress-point class in signature-prefix form (e.g. `Lcom/acme/Main`).
    pub progress_class: Option<String>,
    /// Progress-point source line.
    pub progress_line: Option<i32>,
    pub log_level: LogLevel,
    pub output_file: PathBuf,
    /// Treat completion of the whole scenario as the single progress point.
    pub end_to_end: bool,
    /// Delay before the first sampling round.
    pub warmup: Duration,
    /// Never adapt the experiment length.
    pub fixed_duration: bool,
    /// Base seed for the per-iteration RNG; `None` seeds from entropy.
    #[serde(skip)]
    pub seed: Option<u64>,
    /// Pins every trial to this speedup instead of drawing one.
    #[serde(skip)]
    pub speedup_override: Option<f32>,
}

impl Default for ProfilerOptions {
    fn default() -> Self {
        Self {
            search_scopes: Vec::new(),
            ignored_scopes: Vec::new(),
            progress_class: None,
            progress_line: None,
            log_level: LogLevel::Info,
            output_file: PathBuf::from(DEFAULT_OUTPUT_FILE),
            end_to_end: false,
            warmup: Duration::ZERO,
            fixed_duration: false,
            seed: None,
            speedup_override: None,
        }
    }
}

impl ProfilerOptions {
    /// Parses the underscore-delimited agent option string.
    pub fn parse(options: &str) -> Result<Self, ConfigError> {
        if options.trim().is_empty() {
            return Err(ConfigError::MissingOptions);
        }

        let mut parsed = ProfilerOptions::default();
        for token in options.split('_') {
            let (key, value) = match token.split_once('=') {
                Some(pair) => pair,
                // Flag options carry no value.
                None => (token, ""),
            };
            match key {
                "search" => {
                    parsed
                        .search_scopes
                        .extend(value.split('|').filter(|s| !s.is_empty()).map(normalize_scope));
                }
                "ignore" => {
                    parsed
                        .ignored_scopes
                        .extend(value.split('|').filter(|s| !s.is_empty()).map(normalize_scope));
                }
                "progress-point" => {
                    let (class, line) = value
                        .split_once(':')
                        .ok_or_else(|| ConfigError::MalformedToken(token.to_string()))?;
                    let line: i32 = line.parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                    parsed.progress_class = Some(class.to_string());
                    parsed.progress_line = Some(line);
                }
                "logging-level" => {
                    parsed.log_level =
                        LogLevel::parse(value).ok_or_else(|| ConfigError::InvalidValue {
                            key: key.to_string(),
                            value: value.to_string(),
                        })?;
                }
                "output-file" => {
                    parsed.output_file = PathBuf::from(value);
                }
                "end-to-end" => {
                    parsed.end_to_end = true;
                }
                "warmup" => {
                    let millis: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                        key: key.to_string(),
                        value: value.to_string(),
                    })?;
                    parsed.warmup = Duration::from_millis(millis);
                }
                "fixed-duration" => {
                    parsed.fixed_duration = true;
                }
                other => return Err(ConfigError::UnknownOption(other.to_string())),
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Checks the invariants that make a configuration usable: at least one
    /// search scope, and a resolved progress point unless running
    /// end-to-end.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.search_scopes.is_empty() {
            return Err(ConfigError::MissingRequired);
        }
        if !self.end_to_end && (self.progress_class.is_none() || self.progress_line.is_none()) {
            return Err(ConfigError::MissingRequired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_option_string() {
        let opts = ProfilerOptions::parse(
            "search=com.acme|org.demo_ignore=com.acme.vendor_progress-point=Lcom/acme/Main:42_logging-level=debug_output-file=out.csv_warmup=250",
        )
        .expect("parse");
        assert_eq!(opts.search_scopes, vec!["com/acme", "org/demo"]);
        assert_eq!(opts.ignored_scopes, vec!["com/acme/vendor"]);
        assert_eq!(opts.progress_class.as_deref(), Some("Lcom/acme/Main"));
        assert_eq!(opts.progress_line, Some(42));
        assert_eq!(opts.log_level, LogLevel::Debug);
        assert_eq!(opts.output_file, PathBuf::from("out.csv"));
        assert_eq!(opts.warmup, Duration::from_millis(250));
        assert!(!opts.end_to_end);
        assert!(!opts.fixed_duration);
    }

    #[test]
    fn missing_search_scope_is_fatal() {
        let err = ProfilerOptions::parse("progress-point=LMain:10").unwrap_err();
        assert_eq!(err, ConfigError::MissingRequired);
    }

    #[test]
    fn missing_progress_point_is_fatal_unless_end_to_end() {
        let err = ProfilerOptions::parse("search=com.acme").unwrap_err();
        assert_eq!(err, ConfigError::MissingRequired);
        let opts = ProfilerOptions::parse("search=com.acme_end-to-end").expect("parse");
        assert!(opts.end_to_end);
        assert!(opts.progress_class.is_none());
    }

    #[test]
    fn unknown_option_is_fatal() {
        let err = ProfilerOptions::parse("search=a_bogus=1").unwrap_err();
        assert_eq!(err, ConfigError::UnknownOption("bogus".to_string()));
    }

    #[test]
    fn defaults_apply() {
        let opts =
            ProfilerOptions::parse("search=com.acme_progress-point=LMain:7").expect("parse");
        assert_eq!(opts.output_file, PathBuf::from(DEFAULT_OUTPUT_FILE));
        assert_eq!(opts.log_level, LogLevel::Info);
        assert_eq!(opts.warmup, Duration::ZERO);
    }

    #[test]
    fn flag_options_parse_with_fixed_duration() {
        let opts = ProfilerOptions::parse("search=a_progress-point=LA:1_fixed-duration")
            .expect("parse");
        assert!(opts.fixed_duration);
    }
}
