//! State handler functions and table builder.
//!
//! ```text
//!            ┌──[no reset/battery ∧ deadline ahead]───────────┐
//!            │                                                ▼
//!  AWAKE_PROCESSING ──[otherwise]──▶ TRANSMITTING ──[done]──▶ SLEEPING
//!            ▲                                                │
//!            └──────────────────────[woke]────────────────────┘
//! ```

use super::context::FsmContext;
use super::{StateDescriptor, StateId};
use log::debug;

// ═══════════════════════════════════════════════════════════════════════════
//  Table builder
// ═══════════════════════════════════════════════════════════════════════════

/// Build the static state table.  Called once at boot.
pub fn build_state_table() -> [StateDescriptor; StateId::COUNT] {
    [
        // Index 0: AwakeProcessing
        StateDescriptor {
            id: StateId::AwakeProcessing,
            name: "AwakeProcessing",
            on_enter: Some(awake_enter),
            on_exit: None,
            on_update: awake_update,
        },
        // Index 1: Transmitting
        StateDescriptor {
            id: StateId::Transmitting,
            name: "Transmitting",
            on_enter: Some(transmitting_enter),
            on_exit: None,
            on_update: transmitting_update,
        },
        // Index 2: Sleeping
        StateDescriptor {
            id: StateId::Sleeping,
            name: "Sleeping",
            on_enter: Some(sleeping_enter),
            on_exit: Some(sleeping_exit),
            on_update: sleeping_update,
        },
    ]
}

// ═══════════════════════════════════════════════════════════════════════════
//  AWAKE_PROCESSING
// ═══════════════════════════════════════════════════════════════════════════

fn awake_enter(ctx: &mut FsmContext) {
    ctx.cycles = ctx.cycles.wrapping_add(1);
    ctx.fast_path = false;
}

fn awake_update(ctx: &mut FsmContext) -> Option<StateId> {
    // Reset and low-battery latches always force a report, so a reset that
    // arrives alongside dispenses is never swallowed here.  A wake with
    // nothing latched is the dispense input settling back to idle.
    if !ctx.pending.needs_report() && !ctx.deadline_elapsed {
        ctx.fast_path = true;
        debug!("AWAKE: no report due, deadline ahead");
        return Some(StateId::Sleeping);
    }
    Some(StateId::Transmitting)
}

// ═══════════════════════════════════════════════════════════════════════════
//  TRANSMITTING
// ═══════════════════════════════════════════════════════════════════════════

fn transmitting_enter(ctx: &mut FsmContext) {
    ctx.report_done = false;
}

fn transmitting_update(ctx: &mut FsmContext) -> Option<StateId> {
    // Success and failure both end the attempt; there is no in-cycle retry.
    if ctx.report_done {
        ctx.reports = ctx.reports.wrapping_add(1);
        return Some(StateId::Sleeping);
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
//  SLEEPING
// ═══════════════════════════════════════════════════════════════════════════

fn sleeping_enter(ctx: &mut FsmContext) {
    ctx.woke = false;
}

fn sleeping_exit(ctx: &mut FsmContext) {
    ctx.woke = false;
    ctx.pending = Default::default();
    ctx.deadline_elapsed = false;
}

fn sleeping_update(ctx: &mut FsmContext) -> Option<StateId> {
    if ctx.woke {
        return Some(StateId::AwakeProcessing);
    }
    None
}
