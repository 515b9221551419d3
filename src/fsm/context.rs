//! Decision inputs threaded through every FSM handler.
//!
//! The loop writes the wake snapshot before ticking `AwakeProcessing` and
//! the completion flags after doing the I/O a state asked for.  Handlers
//! write back only the `fast_path` verdict and the counters.

use crate::events::PendingEvents;

/// Blackboard shared by the control loop and the state handlers.
#[derive(Debug, Default)]
pub struct FsmContext {
    // -- Wake snapshot (written by the loop) --
    /// Latches drained at the start of this cycle.
    pub pending: PendingEvents,
    /// The reporting deadline has passed, is unknown, or the timer woke us.
    pub deadline_elapsed: bool,

    // -- Completion flags (written by the loop) --
    /// The join/compose/transmit sequence has run, whatever its outcome.
    pub report_done: bool,
    /// The platform sleep call has returned.
    pub woke: bool,

    // -- Verdicts (written by handlers) --
    /// This cycle went back to sleep without reporting.
    pub fast_path: bool,

    // -- Counters --
    /// Awake cycles entered since boot.
    pub cycles: u64,
    /// Report attempts since boot.
    pub reports: u64,
}
