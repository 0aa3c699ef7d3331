#![forbid(unsafe_code)]

//! Per-request stall detection for long-running streaming API calls.
//!
//! A streaming request can hang without ever returning data or an error, for
//! example when the remote service quietly throttles it. The
//! [`StallDetector`] watches one request's activity, probes the service when
//! the request goes silent, and reports a stall exactly once when the service
//! answers promptly but the request does not.

pub mod config;
pub mod detector;
pub mod errors;
pub mod guard;
pub mod probe;

pub use config::{DetectorConfig, GlobalConfig};
pub use detector::{create_detector, StallDetector, StallDetectorHandle, StallReason};
pub use errors::{AppError, Result};
pub use guard::{guard_stream, StallGuardedStream};
pub use probe::{probe_fn, HealthProbe, ProbeResult};
