//! Error types shared across the crate.
//!
//! The detector itself never returns errors to its caller; these variants
//! cover configuration loading, probe failures (which the detector treats as
//! inconclusive) and the guarded stream surface.

use std::fmt::{Display, Formatter};

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Error enumeration covering all failure modes outside the detector core.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Health probe failed to produce a result.
    ///
    /// Raised when a probe task panics. Custom [`HealthProbe`](crate::HealthProbe)
    /// implementations return it for failures that are not transport errors.
    Probe(String),
    /// HTTP transport failure while probing or streaming.
    Http(String),
    /// The monitored request was declared stalled.
    Stalled(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Probe(msg) => write!(f, "probe: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Stalled(msg) => write!(f, "stalled: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
