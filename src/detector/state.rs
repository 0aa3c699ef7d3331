//! Detector phase, transition table, activity clock, and stall reasons.

use std::fmt::{Display, Formatter};
use std::time::Duration;

use tokio::time::Instant;

use crate::probe::duration_millis;

/// Lifecycle phase of a single stall detector.
///
/// `Stalled` and `Disposed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorPhase {
    /// No activity observed yet; the first-event timer is armed.
    AwaitingFirstEvent,
    /// Activity observed; the idle-check timer is armed.
    IdleChecking,
    /// A health probe is in flight.
    Probing,
    /// A stall has been declared and signaled.
    Stalled,
    /// The request completed and the detector was torn down.
    Disposed,
}

/// Inputs driving [`DetectorPhase`] transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The request made progress.
    Activity,
    /// The first-event timer fired before any activity.
    FirstEventTimeout {
        /// Whether a health probe can be consulted.
        probe_configured: bool,
    },
    /// The idle-check timer fired with silence at or past the idle timeout.
    IdleThresholdReached {
        /// Whether a health probe can be consulted.
        probe_configured: bool,
    },
    /// The probe found the service slow, unresponsive, or failed.
    ProbeInconclusive,
    /// The probe found the service healthy while the request is silent.
    ProbeConfirmedStall,
    /// Silence exceeded the configured ceiling.
    SilenceCeilingReached,
    /// The owner tore the detector down.
    Dispose,
}

impl DetectorPhase {
    /// Apply `transition`, returning the next phase.
    ///
    /// Returns `None` when the input does not apply in this phase (every
    /// input in a terminal phase, a probe verdict outside `Probing`, a timer
    /// firing while a probe is in flight). Callers must leave state untouched
    /// on `None`.
    #[must_use]
    pub fn on(self, transition: Transition) -> Option<Self> {
        use DetectorPhase::{AwaitingFirstEvent, Disposed, IdleChecking, Probing, Stalled};

        match (self, transition) {
            (Stalled | Disposed, _) => None,
            (_, Transition::Dispose) => Some(Disposed),

            (AwaitingFirstEvent | IdleChecking, Transition::Activity) => Some(IdleChecking),
            (Probing, Transition::Activity) => Some(Probing),

            (AwaitingFirstEvent, Transition::FirstEventTimeout { probe_configured })
            | (IdleChecking, Transition::IdleThresholdReached { probe_configured }) => {
                Some(if probe_configured { Probing } else { Stalled })
            }

            (Probing, Transition::ProbeInconclusive) => Some(IdleChecking),
            (Probing, Transition::ProbeConfirmedStall) | (_, Transition::SilenceCeilingReached) => {
                Some(Stalled)
            }

            _ => None,
        }
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stalled | Self::Disposed)
    }
}

/// Timestamp of the most recent progress signal.
#[derive(Debug, Clone, Copy)]
pub struct ActivityClock {
    last_activity_at: Instant,
    received_first_event: bool,
}

impl ActivityClock {
    /// Start the clock at `now`; no event has been received yet.
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity_at: now,
            received_first_event: false,
        }
    }

    /// Record activity at `now`. Returns `true` for the first event.
    ///
    /// The timestamp never moves backwards.
    pub fn record(&mut self, now: Instant) -> bool {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
        let first = !self.received_first_event;
        self.received_first_event = true;
        first
    }

    /// When activity was last recorded (creation time before the first event).
    #[must_use]
    pub fn last_activity_at(&self) -> Instant {
        self.last_activity_at
    }

    /// Whether any activity has been recorded.
    #[must_use]
    pub fn received_first_event(&self) -> bool {
        self.received_first_event
    }

    /// Silence elapsed between the last activity and `now`.
    #[must_use]
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity_at)
    }

    /// The ceiling stall reason, if silence at `now` has reached `ceiling`.
    #[must_use]
    pub fn ceiling_breach(&self, now: Instant, ceiling: Duration) -> Option<StallReason> {
        let idle_for = self.idle_for(now);
        (idle_for >= ceiling).then(|| StallReason::SilenceCeiling {
            elapsed_ms: duration_millis(idle_for),
            ceiling_ms: duration_millis(ceiling),
        })
    }
}

/// Why a stall was declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StallReason {
    /// No activity at all within the first-event timeout, and no probe.
    NoFirstEvent {
        /// Configured first-event timeout.
        timeout_ms: u64,
    },
    /// Silence past the idle timeout, and no probe.
    Idle {
        /// Observed silence.
        elapsed_ms: u64,
    },
    /// The probe answered quickly while the request stayed silent.
    ResponsiveButStalled {
        /// Observed silence when the probe was launched.
        idle_ms: u64,
        /// Latency of the winning probe result.
        probe_latency_ms: u64,
    },
    /// Silence exceeded the configured ceiling.
    SilenceCeiling {
        /// Observed silence.
        elapsed_ms: u64,
        /// Configured ceiling.
        ceiling_ms: u64,
    },
}

impl Display for StallReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoFirstEvent { timeout_ms } => {
                write!(f, "no response within {timeout_ms}ms")
            }
            Self::Idle { elapsed_ms } => write!(f, "no activity for {elapsed_ms}ms"),
            Self::ResponsiveButStalled {
                idle_ms,
                probe_latency_ms,
            } => write!(
                f,
                "API responsive ({probe_latency_ms}ms) but request stalled for {idle_ms}ms, likely externally throttled"
            ),
            Self::SilenceCeiling {
                elapsed_ms,
                ceiling_ms,
            } => write!(
                f,
                "no activity for {elapsed_ms}ms, exceeding the {ceiling_ms}ms ceiling"
            ),
        }
    }
}
