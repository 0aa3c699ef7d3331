//! Health probes used to tell a stalled request apart from a slow service.
//!
//! A [`HealthProbe`] is a cheap, independent call against the remote service.
//! The detector never trusts it to finish promptly: every invocation goes
//! through [`racer::race_probe`], which bounds it with its own timeout.

pub mod http;
pub mod racer;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::Result;

/// Outcome of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeResult {
    /// Whether the service answered at all.
    pub responsive: bool,
    /// Round-trip latency in milliseconds.
    pub latency_ms: u64,
}

impl ProbeResult {
    /// Result substituted when the probe does not finish within `timeout`.
    #[must_use]
    pub fn timed_out(timeout: Duration) -> Self {
        Self {
            responsive: false,
            latency_ms: duration_millis(timeout),
        }
    }
}

/// Boxed future returned by [`HealthProbe::probe`].
pub type ProbeFuture<'a> = Pin<Box<dyn Future<Output = Result<ProbeResult>> + Send + 'a>>;

/// Independent liveness check against the remote service.
///
/// Implementations must be safe to call repeatedly. Credentials, if any, are
/// captured at construction time.
pub trait HealthProbe: Send + Sync {
    /// Run one probe.
    ///
    /// # Errors
    ///
    /// Implementations return an error when the probe itself could not be
    /// carried out (e.g. a transport failure). The detector treats such
    /// errors as inconclusive.
    fn probe(&self) -> ProbeFuture<'_>;
}

/// [`HealthProbe`] backed by a closure; see [`probe_fn`].
#[derive(Clone)]
pub struct ProbeFn<F> {
    f: F,
}

impl<F> std::fmt::Debug for ProbeFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeFn").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`HealthProbe`].
#[must_use]
pub fn probe_fn<F, Fut>(f: F) -> ProbeFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeResult>> + Send + 'static,
{
    ProbeFn { f }
}

impl<F, Fut> HealthProbe for ProbeFn<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<ProbeResult>> + Send + 'static,
{
    fn probe(&self) -> ProbeFuture<'_> {
        Box::pin((self.f)())
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
