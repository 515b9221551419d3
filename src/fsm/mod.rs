//! Function-pointer finite state machine engine.
//!
//! The control loop's three states live in a fixed table:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  StateTable                                                  │
//! │  ┌─────────────────┬───────────┬──────────┬───────────────┐  │
//! │  │ StateId         │ on_enter  │ on_exit  │ on_update     │  │
//! │  ├─────────────────┼───────────┼──────────┼───────────────┤  │
//! │  │ AwakeProcessing │ fn(ctx)   │ -        │ fn -> Option  │  │
//! │  │ Transmitting    │ fn(ctx)   │ -        │ fn -> Option  │  │
//! │  │ Sleeping        │ fn(ctx)   │ fn(ctx)  │ fn -> Option  │  │
//! │  └─────────────────┴───────────┴──────────┴───────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Handlers only decide.  They read the inputs the
//! [`ControlLoop`](crate::app::service::ControlLoop) places in
//! [`FsmContext`] and return the next state; all radio, storage and sleep
//! I/O happens in the loop between ticks.  That keeps the transition rules
//! testable without any port implementation.

pub mod context;
pub mod states;

use context::FsmContext;
use log::debug;

// ---------------------------------------------------------------------------
// State identity
// ---------------------------------------------------------------------------

/// Control loop states.
/// Must stay in sync with the table built in [`states::build_state_table`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StateId {
    AwakeProcessing = 0,
    Transmitting = 1,
    Sleeping = 2,
}

impl StateId {
    /// Number of states; sizes the table array.
    pub const COUNT: usize = 3;

    /// Convert a table index back to `StateId`.  Out-of-range indices
    /// assert in debug builds and fall back to `AwakeProcessing`.
    pub fn from_index(idx: usize) -> Self {
        match idx {
            0 => Self::AwakeProcessing,
            1 => Self::Transmitting,
            2 => Self::Sleeping,
            _ => {
                debug_assert!(false, "invalid state index: {idx}");
                Self::AwakeProcessing
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Function-pointer type aliases
// ---------------------------------------------------------------------------

/// `on_enter` / `on_exit` action, run once per transition.
pub type StateActionFn = fn(&mut FsmContext);

/// Per-tick decision.  `Some(next)` transitions, `None` stays.
pub type StateUpdateFn = fn(&mut FsmContext) -> Option<StateId>;

// ---------------------------------------------------------------------------
// State descriptor (one row in the table)
// ---------------------------------------------------------------------------

/// Static descriptor for a single state.
pub struct StateDescriptor {
    pub id: StateId,
    pub name: &'static str,
    pub on_enter: Option<StateActionFn>,
    pub on_exit: Option<StateActionFn>,
    pub on_update: StateUpdateFn,
}

// ---------------------------------------------------------------------------
// FSM engine
// ---------------------------------------------------------------------------

/// The state machine engine.
pub struct Fsm {
    /// Fixed-size table indexed by `StateId as usize`.
    table: [StateDescriptor; StateId::COUNT],
    /// Index of the active state.
    current: usize,
    /// Ticks since construction (wrapping).
    tick_count: u64,
    /// Tick at which the current state was entered.
    state_entry_tick: u64,
}

impl Fsm {
    /// Construct with the given table, starting in `initial`.
    pub fn new(table: [StateDescriptor; StateId::COUNT], initial: StateId) -> Self {
        Self {
            table,
            current: initial as usize,
            tick_count: 0,
            state_entry_tick: 0,
        }
    }

    /// Run `on_enter` for the starting state.  Call once before the first
    /// `tick()`.
    pub fn start(&mut self, ctx: &mut FsmContext) {
        debug!("FSM starting in state: {}", self.table[self.current].name);
        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }

    /// Evaluate the current state's `on_update` and apply any transition.
    /// Returns the state after the tick.
    pub fn tick(&mut self, ctx: &mut FsmContext) -> StateId {
        self.tick_count = self.tick_count.wrapping_add(1);

        if let Some(next_id) = (self.table[self.current].on_update)(ctx) {
            self.transition(next_id, ctx);
        }
        self.current_state()
    }

    /// Jump to `next` regardless of `on_update`, running the exit and
    /// enter actions.  A no-op when already there.
    pub fn force_transition(&mut self, next: StateId, ctx: &mut FsmContext) {
        if next as usize != self.current {
            self.transition(next, ctx);
        }
    }

    pub fn current_state(&self) -> StateId {
        StateId::from_index(self.current)
    }

    /// Ticks spent in the current state.
    pub fn ticks_in_current_state(&self) -> u64 {
        self.tick_count.wrapping_sub(self.state_entry_tick)
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn transition(&mut self, next_id: StateId, ctx: &mut FsmContext) {
        let next_idx = next_id as usize;

        debug!(
            "FSM transition: {} -> {}",
            self.table[self.current].name, self.table[next_idx].name
        );

        if let Some(exit) = self.table[self.current].on_exit {
            exit(ctx);
        }

        self.current = next_idx;
        self.state_entry_tick = self.tick_count;

        if let Some(enter) = self.table[self.current].on_enter {
            enter(ctx);
        }
    }
}
