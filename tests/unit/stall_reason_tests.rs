//! Unit tests for human-readable stall reasons.

use stallguard::StallReason;

#[test]
fn no_first_event_cites_timeout() {
    let reason = StallReason::NoFirstEvent { timeout_ms: 15_000 };
    assert_eq!(reason.to_string(), "no response within 15000ms");
}

#[test]
fn idle_cites_elapsed_silence() {
    let reason = StallReason::Idle { elapsed_ms: 10_250 };
    assert_eq!(reason.to_string(), "no activity for 10250ms");
}

#[test]
fn responsive_but_stalled_mentions_throttling() {
    let reason = StallReason::ResponsiveButStalled {
        idle_ms: 12_000,
        probe_latency_ms: 140,
    };
    let text = reason.to_string();
    assert!(text.contains("API responsive"), "{text}");
    assert!(text.contains("request stalled"), "{text}");
    assert!(text.contains("likely externally throttled"), "{text}");
    assert!(text.contains("140ms"), "{text}");
    assert!(text.contains("12000ms"), "{text}");
}

#[test]
fn silence_ceiling_cites_both_durations() {
    let reason = StallReason::SilenceCeiling {
        elapsed_ms: 61_000,
        ceiling_ms: 60_000,
    };
    assert_eq!(
        reason.to_string(),
        "no activity for 61000ms, exceeding the 60000ms ceiling"
    );
}

#[test]
fn reasons_do_not_end_with_period() {
    let reasons = [
        StallReason::NoFirstEvent { timeout_ms: 1 },
        StallReason::Idle { elapsed_ms: 1 },
        StallReason::ResponsiveButStalled {
            idle_ms: 1,
            probe_latency_ms: 1,
        },
        StallReason::SilenceCeiling {
            elapsed_ms: 2,
            ceiling_ms: 1,
        },
    ];
    for reason in reasons {
        let text = reason.to_string();
        assert!(!text.ends_with('.'), "{text}");
    }
}
