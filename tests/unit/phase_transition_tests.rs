//! Unit tests for the detector phase transition table.
//!
//! Exercises every phase against the inputs that matter for it, including
//! the inputs a phase must ignore.

use stallguard::detector::{DetectorPhase, Transition};

const ALL_TRANSITIONS: [Transition; 9] = [
    Transition::Activity,
    Transition::FirstEventTimeout {
        probe_configured: true,
    },
    Transition::FirstEventTimeout {
        probe_configured: false,
    },
    Transition::IdleThresholdReached {
        probe_configured: true,
    },
    Transition::IdleThresholdReached {
        probe_configured: false,
    },
    Transition::ProbeInconclusive,
    Transition::ProbeConfirmedStall,
    Transition::SilenceCeilingReached,
    Transition::Dispose,
];

#[test]
fn first_activity_moves_to_idle_checking() {
    assert_eq!(
        DetectorPhase::AwaitingFirstEvent.on(Transition::Activity),
        Some(DetectorPhase::IdleChecking)
    );
}

#[test]
fn activity_keeps_idle_checking_and_probing() {
    assert_eq!(
        DetectorPhase::IdleChecking.on(Transition::Activity),
        Some(DetectorPhase::IdleChecking)
    );
    assert_eq!(
        DetectorPhase::Probing.on(Transition::Activity),
        Some(DetectorPhase::Probing)
    );
}

#[test]
fn first_event_timeout_probes_when_probe_configured() {
    assert_eq!(
        DetectorPhase::AwaitingFirstEvent.on(Transition::FirstEventTimeout {
            probe_configured: true
        }),
        Some(DetectorPhase::Probing)
    );
}

#[test]
fn first_event_timeout_stalls_without_probe() {
    assert_eq!(
        DetectorPhase::AwaitingFirstEvent.on(Transition::FirstEventTimeout {
            probe_configured: false
        }),
        Some(DetectorPhase::Stalled)
    );
}

#[test]
fn first_event_timeout_ignored_after_first_event() {
    let fired = Transition::FirstEventTimeout {
        probe_configured: false,
    };
    assert_eq!(DetectorPhase::IdleChecking.on(fired), None);
    assert_eq!(DetectorPhase::Probing.on(fired), None);
}

#[test]
fn idle_threshold_probes_or_stalls() {
    assert_eq!(
        DetectorPhase::IdleChecking.on(Transition::IdleThresholdReached {
            probe_configured: true
        }),
        Some(DetectorPhase::Probing)
    );
    assert_eq!(
        DetectorPhase::IdleChecking.on(Transition::IdleThresholdReached {
            probe_configured: false
        }),
        Some(DetectorPhase::Stalled)
    );
}

#[test]
fn idle_threshold_while_probing_is_ignored() {
    // A second probe must never start while one is in flight.
    assert_eq!(
        DetectorPhase::Probing.on(Transition::IdleThresholdReached {
            probe_configured: true
        }),
        None
    );
}

#[test]
fn probe_verdicts_resolve_probing() {
    assert_eq!(
        DetectorPhase::Probing.on(Transition::ProbeInconclusive),
        Some(DetectorPhase::IdleChecking)
    );
    assert_eq!(
        DetectorPhase::Probing.on(Transition::ProbeConfirmedStall),
        Some(DetectorPhase::Stalled)
    );
}

#[test]
fn probe_verdicts_outside_probing_are_ignored() {
    for phase in [DetectorPhase::AwaitingFirstEvent, DetectorPhase::IdleChecking] {
        assert_eq!(phase.on(Transition::ProbeInconclusive), None, "{phase:?}");
        assert_eq!(phase.on(Transition::ProbeConfirmedStall), None, "{phase:?}");
    }
}

#[test]
fn silence_ceiling_stalls_every_live_phase() {
    for phase in [
        DetectorPhase::AwaitingFirstEvent,
        DetectorPhase::IdleChecking,
        DetectorPhase::Probing,
    ] {
        assert_eq!(
            phase.on(Transition::SilenceCeilingReached),
            Some(DetectorPhase::Stalled),
            "{phase:?}"
        );
    }
}

#[test]
fn dispose_reachable_from_every_live_phase() {
    for phase in [
        DetectorPhase::AwaitingFirstEvent,
        DetectorPhase::IdleChecking,
        DetectorPhase::Probing,
    ] {
        assert_eq!(
            phase.on(Transition::Dispose),
            Some(DetectorPhase::Disposed),
            "{phase:?}"
        );
    }
}

#[test]
fn terminal_phases_ignore_every_input() {
    for phase in [DetectorPhase::Stalled, DetectorPhase::Disposed] {
        assert!(phase.is_terminal());
        for transition in ALL_TRANSITIONS {
            assert_eq!(phase.on(transition), None, "{phase:?} + {transition:?}");
        }
    }
}

#[test]
fn live_phases_are_not_terminal() {
    assert!(!DetectorPhase::AwaitingFirstEvent.is_terminal());
    assert!(!DetectorPhase::IdleChecking.is_terminal());
    assert!(!DetectorPhase::Probing.is_terminal());
}
