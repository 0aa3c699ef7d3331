//! Stall detection for a single streaming request.
//!
//! Covers the activity clock, the phase transition table, and the timer-driven
//! detector that races health probes against request silence.

pub mod stall_detector;
pub mod state;

pub use stall_detector::{create_detector, StallCallback, StallDetector, StallDetectorHandle};
pub use state::{ActivityClock, DetectorPhase, StallReason, Transition};
