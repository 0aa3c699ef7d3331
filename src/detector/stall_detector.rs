//! Per-request stall detector.
//!
//! Each streaming request gets a [`StallDetector`] that watches for silence.
//! The request layer calls [`on_activity`](StallDetectorHandle::on_activity)
//! on every received chunk and [`dispose`](StallDetectorHandle::dispose) when
//! the request completes. When the request goes quiet, the detector consults
//! an optional [`HealthProbe`] to decide whether the whole service is slow
//! (keep waiting) or this request alone is stuck (declare a stall).
//!
//! A stall is reported exactly once, through the `on_stall` callback.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::state::{ActivityClock, DetectorPhase, StallReason, Transition};
use crate::config::DetectorConfig;
use crate::probe::racer::{classify, race_probe};
use crate::probe::{duration_millis, HealthProbe};

/// Callback invoked once when a stall is declared.
pub type StallCallback = Box<dyn FnOnce(StallReason) + Send + 'static>;

/// Mutable detector state, guarded by a single mutex.
struct DetectorState {
    phase: DetectorPhase,
    clock: ActivityClock,
    on_stall: Option<StallCallback>,
}

/// State shared between the handle and the driver task.
struct Shared {
    state: Mutex<DetectorState>,
    first_activity: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, DetectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phase(&self) -> DetectorPhase {
        self.lock().phase
    }

    fn last_activity_at(&self) -> Instant {
        self.lock().clock.last_activity_at()
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.lock().clock.idle_for(now)
    }

    fn record_activity(&self) {
        let mut state = self.lock();
        let Some(next) = state.phase.on(Transition::Activity) else {
            return;
        };
        state.phase = next;
        let first = state.clock.record(Instant::now());
        drop(state);

        if first {
            self.first_activity.notify_one();
        }
    }

    /// Apply a transition that cannot land in `Stalled`.
    fn apply(&self, transition: Transition) -> Option<DetectorPhase> {
        let mut state = self.lock();
        let next = state.phase.on(transition)?;
        debug_assert_ne!(next, DetectorPhase::Stalled);
        state.phase = next;
        let released = if next == DetectorPhase::Disposed {
            state.on_stall.take()
        } else {
            None
        };
        drop(state);
        drop(released);
        Some(next)
    }

    /// Move to `Stalled` via `transition` and fire the callback.
    ///
    /// Returns `false` without touching state when the transition does not
    /// apply (already stalled, disposed, or superseded by activity).
    fn declare_stall(&self, transition: Transition, reason: StallReason) -> bool {
        let callback = {
            let mut state = self.lock();
            if state.phase.on(transition) != Some(DetectorPhase::Stalled) {
                return false;
            }
            state.phase = DetectorPhase::Stalled;
            state.on_stall.take()
        };
        signal(callback, reason);
        true
    }

    /// Stall if silence has reached `ceiling`, checked against the clock
    /// under the same lock as the transition.
    fn declare_ceiling_stall(&self, ceiling: Duration) -> bool {
        let (callback, reason) = {
            let mut state = self.lock();
            let Some(reason) = state.clock.ceiling_breach(Instant::now(), ceiling) else {
                return false;
            };
            if state.phase.on(Transition::SilenceCeilingReached) != Some(DetectorPhase::Stalled) {
                return false;
            }
            state.phase = DetectorPhase::Stalled;
            (state.on_stall.take(), reason)
        };
        signal(callback, reason);
        true
    }

    /// Resolve the in-flight probe.
    ///
    /// A confirming verdict only stalls the request if no activity was
    /// recorded after `silent_since`; otherwise checking resumes.
    fn resolve_probe(
        &self,
        confirmed: bool,
        silent_since: Instant,
        reason: StallReason,
    ) -> Option<DetectorPhase> {
        let mut state = self.lock();
        let resumed = state.clock.last_activity_at() > silent_since;
        let transition = if confirmed && !resumed {
            Transition::ProbeConfirmedStall
        } else {
            Transition::ProbeInconclusive
        };
        let next = state.phase.on(transition)?;
        state.phase = next;

        if next == DetectorPhase::Stalled {
            let callback = state.on_stall.take();
            drop(state);
            signal(callback, reason);
        } else if confirmed {
            drop(state);
            debug!("activity resumed while probing; discarding verdict");
        }
        Some(next)
    }
}

/// Deliver the stall notification outside the state lock.
fn signal(callback: Option<StallCallback>, reason: StallReason) {
    warn!(%reason, "stall declared");
    if let Some(callback) = callback {
        callback(reason);
    }
}

/// Builder for a per-request stall detector.
///
/// Call [`spawn`](Self::spawn) to start the background timer task.
pub struct StallDetector {
    provider: String,
    config: DetectorConfig,
    on_stall: StallCallback,
    probe: Option<Arc<dyn HealthProbe>>,
    cancel: CancellationToken,
}

impl StallDetector {
    /// Construct a new detector (does not start the timers yet).
    #[must_use]
    pub fn new(
        provider: impl Into<String>,
        config: DetectorConfig,
        on_stall: impl FnOnce(StallReason) + Send + 'static,
    ) -> Self {
        Self {
            provider: provider.into(),
            config,
            on_stall: Box::new(on_stall),
            probe: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Consult `probe` before declaring a stall on silence.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Tear the detector down when `parent` is cancelled (e.g. on shutdown).
    #[must_use]
    pub fn with_cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Arm the first-event timer and spawn the driver task.
    ///
    /// A config with zero durations or a ceiling below the idle timeout is
    /// replaced by [`DetectorConfig::default`].
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(self) -> StallDetectorHandle {
        let config = match self.config.check_bounds() {
            Ok(()) => self.config,
            Err(err) => {
                warn!(provider = %self.provider, %err, "invalid detector config; using defaults");
                DetectorConfig::default()
            }
        };

        let shared = Arc::new(Shared {
            state: Mutex::new(DetectorState {
                phase: DetectorPhase::AwaitingFirstEvent,
                clock: ActivityClock::new(Instant::now()),
                on_stall: Some(self.on_stall),
            }),
            first_activity: Notify::new(),
        });

        let driver = Driver {
            shared: Arc::clone(&shared),
            config,
            probe: self.probe,
            cancel: self.cancel.clone(),
            rearm_at: None,
        };

        let task_handle = tokio::spawn(
            driver
                .run()
                .instrument(info_span!("stall_detector", provider = %self.provider)),
        );

        StallDetectorHandle {
            shared,
            provider: self.provider,
            join_handle: Some(task_handle),
            cancel: self.cancel,
        }
    }
}

/// Create and start a detector for one request.
///
/// `on_stall` fires at most once. Without a `probe`, silence alone declares a
/// stall; with one, silence triggers a probe first.
#[must_use]
pub fn create_detector(
    config: DetectorConfig,
    provider: impl Into<String>,
    on_stall: impl FnOnce(StallReason) + Send + 'static,
    probe: Option<Arc<dyn HealthProbe>>,
) -> StallDetectorHandle {
    let mut detector = StallDetector::new(provider, config, on_stall);
    if let Some(probe) = probe {
        detector = detector.with_probe(probe);
    }
    detector.spawn()
}

/// Timer loop owning the first-event and idle-check deadlines.
struct Driver {
    shared: Arc<Shared>,
    config: DetectorConfig,
    probe: Option<Arc<dyn HealthProbe>>,
    cancel: CancellationToken,
    /// Earliest next idle check after an inconclusive probe.
    rearm_at: Option<Instant>,
}

impl Driver {
    async fn run(mut self) {
        let first_event_timeout = match self.config.max_silence() {
            Some(ceiling) => self.config.first_event_timeout().min(ceiling),
            None => self.config.first_event_timeout(),
        };
        let first_event = tokio::time::sleep(first_event_timeout);
        tokio::pin!(first_event);

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.shared.phase() {
                DetectorPhase::AwaitingFirstEvent => {
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = self.shared.first_activity.notified() => {}
                        () = &mut first_event => self.on_first_event_timeout(),
                    }
                }
                DetectorPhase::IdleChecking => {
                    let deadline = self.idle_deadline();
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep_until(deadline) => self.on_idle_check(),
                    }
                }
                DetectorPhase::Probing => self.probe_round().await,
                DetectorPhase::Stalled | DetectorPhase::Disposed => break,
            }
        }

        self.shared.apply(Transition::Dispose);
        debug!("stall detector stopped");
    }

    fn on_first_event_timeout(&mut self) {
        if self.silence_ceiling_reached() {
            return;
        }

        if self.probe.is_some() {
            if self
                .shared
                .apply(Transition::FirstEventTimeout {
                    probe_configured: true,
                })
                .is_some()
            {
                info!(
                    timeout_ms = self.config.first_event_timeout_ms,
                    "no first event yet; probing service health"
                );
            }
        } else {
            self.shared.declare_stall(
                Transition::FirstEventTimeout {
                    probe_configured: false,
                },
                StallReason::NoFirstEvent {
                    timeout_ms: self.config.first_event_timeout_ms,
                },
            );
        }
    }

    fn on_idle_check(&mut self) {
        if self.silence_ceiling_reached() {
            return;
        }

        let now = Instant::now();
        let idle_for = self.shared.idle_for(now);

        let idle_ms = duration_millis(idle_for);
        if idle_for < self.config.idle_timeout() || self.rearm_at.is_some_and(|at| now < at) {
            debug!(idle_ms, "idle check below threshold; re-arming");
            return;
        }

        if self.probe.is_some() {
            if self
                .shared
                .apply(Transition::IdleThresholdReached {
                    probe_configured: true,
                })
                .is_some()
            {
                info!(idle_ms, "request idle; probing service health");
            }
        } else {
            self.shared.declare_stall(
                Transition::IdleThresholdReached {
                    probe_configured: false,
                },
                StallReason::Idle {
                    elapsed_ms: idle_ms,
                },
            );
        }
    }

    async fn probe_round(&mut self) {
        let Some(probe) = self.probe.clone() else {
            self.shared.apply(Transition::ProbeInconclusive);
            return;
        };

        let started = Instant::now();
        let silent_since = self.shared.last_activity_at();
        let idle_ms = duration_millis(started.saturating_duration_since(silent_since));

        let outcome = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            outcome = race_probe(probe, self.config.probe_timeout()) => outcome,
        };

        let verdict = classify(&outcome, self.config.probe_responsive_threshold());
        let probe_latency_ms = match outcome {
            Ok(result) => {
                info!(
                    responsive = result.responsive,
                    latency_ms = result.latency_ms,
                    ?verdict,
                    "health probe finished"
                );
                result.latency_ms
            }
            Err(err) => {
                warn!(%err, "health probe failed; treating as inconclusive");
                0
            }
        };

        let reason = StallReason::ResponsiveButStalled {
            idle_ms,
            probe_latency_ms,
        };
        if self
            .shared
            .resolve_probe(verdict.confirms_stall(), silent_since, reason)
            == Some(DetectorPhase::IdleChecking)
        {
            let next = later(Instant::now(), self.config.idle_timeout());
            debug!(?verdict, "service busy or probe inconclusive; re-arming idle check");
            self.rearm_at = Some(next);
        }
    }

    /// Declare a stall if silence passed the configured ceiling.
    fn silence_ceiling_reached(&self) -> bool {
        self.config
            .max_silence()
            .is_some_and(|ceiling| self.shared.declare_ceiling_stall(ceiling))
    }

    /// Next idle-check deadline: one idle period after the last activity,
    /// no earlier than a pending re-arm, no later than the silence ceiling.
    fn idle_deadline(&self) -> Instant {
        let last = self.shared.last_activity_at();
        let mut deadline = later(last, self.config.idle_timeout());
        if let Some(at) = self.rearm_at {
            deadline = deadline.max(at);
        }
        if let Some(ceiling) = self.config.max_silence() {
            deadline = deadline.min(later(last, ceiling));
        }
        deadline
    }
}

/// `at + delay`, clamped for delays too large to represent.
fn later(at: Instant, delay: Duration) -> Instant {
    at.checked_add(delay)
        .unwrap_or_else(|| at + Duration::from_secs(86_400 * 365))
}

/// Handle returned from [`StallDetector::spawn`] for driving the detector.
///
/// Dropping the handle disposes the detector.
pub struct StallDetectorHandle {
    shared: Arc<Shared>,
    provider: String,
    /// Task handle for the background driver loop.
    join_handle: Option<JoinHandle<()>>,
    /// Per-request cancellation token, cancelled on dispose.
    cancel: CancellationToken,
}

impl Drop for StallDetectorHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl StallDetectorHandle {
    /// Record progress on the request (call on every received chunk).
    ///
    /// No-op once the detector is stalled or disposed.
    pub fn on_activity(&self) {
        self.shared.record_activity();
    }

    /// Tear the detector down; no callback fires afterwards.
    ///
    /// Safe to call repeatedly and from any phase, including while a probe is
    /// in flight.
    pub fn dispose(&self) {
        if self.shared.apply(Transition::Dispose).is_some() {
            debug!(provider = %self.provider, "stall detector disposed");
        }
        self.cancel.cancel();
        if let Some(ref handle) = self.join_handle {
            handle.abort();
        }
    }

    /// Whether a stall has been declared.
    #[must_use]
    pub fn is_stalled(&self) -> bool {
        self.shared.phase() == DetectorPhase::Stalled
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> DetectorPhase {
        self.shared.phase()
    }

    /// Label of the monitored service.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Dispose the detector and wait for its driver task to exit.
    pub async fn await_completion(mut self) {
        self.dispose();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
