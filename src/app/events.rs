//! Outbound application events.
//!
//! The [`ControlLoop`](super::service::ControlLoop) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  The shipped adapter logs
//! them; tests record them.

use crate::battery::BatteryStatus;
use crate::error::Error;
use crate::fsm::StateId;
use crate::payload::Payload;
use crate::scheduler::{SleepDepth, WakeCause};

/// Structured events emitted by the control loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppEvent {
    /// Boot finished.  `warm` is set when resuming from a volatile sleep.
    Started {
        warm: bool,
        remaining: u32,
        interval_secs: u32,
    },

    /// The loop state machine moved.
    StateChanged { from: StateId, to: StateId },

    /// A wake carried dispense edges; `remaining` is the post-drain count.
    DispenseCounted { remaining: u32 },

    /// The manual reset line was drained and the counter refilled.
    CounterReset { full_count: u32 },

    /// The network join completed.
    Joined,

    /// A report went out.
    ReportSent {
        payload: Payload,
        battery: Option<BatteryStatus>,
    },

    /// An external collaborator failed; the loop carries on.
    Failure(Error),

    /// About to enter low-power mode.
    Sleeping { secs: u32, depth: SleepDepth },

    /// Back from low-power mode.
    Woke(WakeCause),
}
