//! Stream adapter that feeds a stall detector and aborts on stall.
//!
//! [`StallGuardedStream`] plays both collaborator roles around a detector:
//! every item from the wrapped stream counts as activity, the end of the
//! stream disposes the detector, and a declared stall cancels the abort
//! token and surfaces as a final [`AppError::Stalled`] item.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::warn;

use crate::config::DetectorConfig;
use crate::detector::{StallDetector, StallDetectorHandle, StallReason};
use crate::probe::HealthProbe;
use crate::AppError;

/// Wrap `stream` with a stall detector configured by `config`.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn guard_stream<S, T, E>(
    stream: S,
    config: DetectorConfig,
    provider: impl Into<String>,
    probe: Option<Arc<dyn HealthProbe>>,
) -> StallGuardedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    E: Into<AppError>,
{
    let provider = provider.into();
    let abort = CancellationToken::new();
    let reason = Arc::new(Mutex::new(None));

    let on_stall = {
        let abort = abort.clone();
        let reason = Arc::clone(&reason);
        move |stall: StallReason| {
            *reason.lock().unwrap_or_else(PoisonError::into_inner) = Some(stall);
            abort.cancel();
        }
    };

    let mut detector = StallDetector::new(provider, config, on_stall);
    if let Some(probe) = probe {
        detector = detector.with_probe(probe);
    }

    StallGuardedStream {
        inner: Box::pin(stream),
        aborted: Box::pin(abort.clone().cancelled_owned()),
        detector: detector.spawn(),
        abort,
        reason,
        finished: false,
    }
}

/// Stream wrapper returned by [`guard_stream`].
pub struct StallGuardedStream<S> {
    inner: Pin<Box<S>>,
    aborted: Pin<Box<WaitForCancellationFutureOwned>>,
    detector: StallDetectorHandle,
    abort: CancellationToken,
    reason: Arc<Mutex<Option<StallReason>>>,
    finished: bool,
}

impl<S> StallGuardedStream<S> {
    /// Token cancelled when a stall is declared.
    ///
    /// Clone it to tear down resources tied to the request (connections,
    /// child tasks) alongside the stream.
    #[must_use]
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Whether the detector declared a stall.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.detector.is_stalled()
    }

    /// The underlying detector handle.
    #[must_use]
    pub fn detector(&self) -> &StallDetectorHandle {
        &self.detector
    }

    fn stall_error(&self) -> AppError {
        let reason = self
            .reason
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let provider = self.detector.provider();
        match reason {
            Some(reason) => AppError::Stalled(format!("{provider}: {reason}")),
            None => AppError::Stalled(format!("{provider}: request aborted")),
        }
    }
}

impl<S, T, E> Stream for StallGuardedStream<S>
where
    S: Stream<Item = Result<T, E>>,
    E: Into<AppError>,
{
    type Item = Result<T, AppError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        if self.aborted.as_mut().poll(cx).is_ready() {
            self.finished = true;
            self.detector.dispose();
            let err = self.stall_error();
            warn!(%err, "aborting stalled stream");
            return Poll::Ready(Some(Err(err)));
        }

        match self.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(item))) => {
                self.detector.on_activity();
                Poll::Ready(Some(Ok(item)))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err.into()))),
            Poll::Ready(None) => {
                self.finished = true;
                self.detector.dispose();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
