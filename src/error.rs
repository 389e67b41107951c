//! Error taxonomy for the profiler engine.
//!
//! Configuration problems are fatal before profiling begins; instrumentation
//! lookups that fail mid-run are transient and only discard the current
//! sample or trial; missing host capabilities disable profiling but leave the
//! host process alone.

use thiserror::Error;

use crate::host::HostError;

/// Fatal problems with the agent option string. Reported once at startup;
/// profiling never begins when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing options string")]
    MissingOptions,
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("malformed option token: {0}")]
    MalformedToken(String),
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
    #[error("missing search scope, progress class, or progress point line")]
    MissingRequired,
}

#[derive(Debug, Error)]
pub enum ProfilerError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The host environment lacks a capability the profiler needs. The caller
    /// is expected to log this and continue without profiling.
    #[error("host capability missing: {0}")]
    Capability(HostError),
    /// The configured progress line was not found in any method of the
    /// matching class. Continuing would silently measure nothing.
    #[error("progress point not resolved for line {0}")]
    ProgressPointUnresolved(i32),
    /// An unrecoverable error from a required instrumentation call.
    #[error("host error: {0}")]
    Host(#[from] HostError),
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProfilerResult<T> = Result<T, ProfilerError>;
