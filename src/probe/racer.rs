//! Bounded probe execution and verdict classification.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::task::AbortOnDropHandle;

use super::{duration_millis, HealthProbe, ProbeResult};
use crate::{AppError, Result};

/// How a probe outcome bears on the monitored request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeVerdict {
    /// The service answered quickly while the request stays silent.
    RequestStalled,
    /// The service answered, but slower than the responsive threshold.
    ServiceSlow,
    /// The service did not answer (or the probe timed out).
    ServiceUnresponsive,
    /// The probe itself failed.
    Inconclusive,
}

impl ProbeVerdict {
    /// Whether this verdict confirms a request-specific stall.
    #[must_use]
    pub fn confirms_stall(self) -> bool {
        matches!(self, Self::RequestStalled)
    }
}

/// Run `probe` on its own task, racing it against a `timeout` fallback.
///
/// Whichever side finishes first wins. The probe task is aborted when it
/// loses, and also when the race itself is dropped. A probe that finishes
/// reports the larger of its own latency and the measured wall-clock latency.
/// A timeout yields `{responsive: false, latency_ms: timeout}`, even when the
/// probe blocks its worker thread.
///
/// # Errors
///
/// Propagates the probe's own error when it fails before the timeout, and
/// returns `AppError::Probe` when the probe task panics.
pub async fn race_probe(probe: Arc<dyn HealthProbe>, timeout: Duration) -> Result<ProbeResult> {
    let started = Instant::now();
    let task = AbortOnDropHandle::new(tokio::spawn(async move { probe.probe().await }));

    tokio::select! {
        biased;
        joined = task => {
            let measured = duration_millis(started.elapsed());
            match joined {
                Ok(outcome) => outcome.map(|result| ProbeResult {
                    responsive: result.responsive,
                    latency_ms: result.latency_ms.max(measured),
                }),
                Err(err) if err.is_panic() => {
                    Err(AppError::Probe("health probe panicked".into()))
                }
                Err(err) => Err(AppError::Probe(format!("health probe task failed: {err}"))),
            }
        }
        () = tokio::time::sleep(timeout) => Ok(ProbeResult::timed_out(timeout)),
    }
}

/// Classify a raced probe outcome against the responsive threshold.
#[must_use]
pub fn classify(outcome: &Result<ProbeResult>, responsive_threshold: Duration) -> ProbeVerdict {
    match outcome {
        Ok(result) if result.responsive => {
            if result.latency_ms < duration_millis(responsive_threshold) {
                ProbeVerdict::RequestStalled
            } else {
                ProbeVerdict::ServiceSlow
            }
        }
        Ok(_) => ProbeVerdict::ServiceUnresponsive,
        Err(_) => ProbeVerdict::Inconclusive,
    }
}
