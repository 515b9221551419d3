//! Interrupt-shared state and event latches.
//!
//! Three edge sources feed the control loop:
//! - dispense pulse (rising edge)
//! - manual counter reset (falling edge)
//! - low-battery comparator trip (falling edge)
//!
//! ```text
//! ┌──────────────┐  fire()   ┌──────────────────────┐  drain()  ┌─────────────┐
//! │ GPIO ISR     │──────────▶│ SharedState          │──────────▶│ ControlLoop │
//! │ (EdgeHandler)│           │ remaining · battery  │           │ (consumer)  │
//! └──────────────┘           │ EventLatches ×3      │           └─────────────┘
//!                            └──────────────────────┘
//! ```
//!
//! Handlers run with the loop suspended and the loop never interrupts a
//! handler, so every shared field is a single atomic word and no
//! multi-field invariant spans the boundary.  The count update happens in
//! the handler; the latch only says "needs attention" and may coalesce.

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Electrical edge a handler is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// The closed set of interrupt handlers.
///
/// [`EdgeHandler::fire`] only has access to atomic operations on
/// [`SharedState`], so no handler can block or perform I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeHandler {
    /// One unit dispensed: decrement (clamped at zero) and latch.
    Dispense,
    /// Manual refill: restore the full count and latch.
    Reset,
    /// Battery comparator tripped: record low and latch.
    LowBattery,
}

impl EdgeHandler {
    /// The edge this handler is registered on.
    pub const fn edge(self) -> Edge {
        match self {
            Self::Dispense => Edge::Rising,
            Self::Reset | Self::LowBattery => Edge::Falling,
        }
    }

    /// Handler body.  Safe to call from interrupt context.
    pub fn fire(self, shared: &SharedState) {
        match self {
            Self::Dispense => {
                shared.decrement_remaining();
                shared.latches.dispense.store(true, Ordering::Release);
            }
            Self::Reset => {
                shared.remaining.store(shared.full_count, Ordering::Release);
                shared.latches.reset.store(true, Ordering::Release);
            }
            Self::LowBattery => {
                shared.battery_low.store(true, Ordering::Release);
                shared.latches.low_battery.store(true, Ordering::Release);
            }
        }
    }
}

/// Three sticky flags set by handlers and cleared by the loop.
#[derive(Debug, Default)]
pub struct EventLatches {
    dispense: AtomicBool,
    reset: AtomicBool,
    low_battery: AtomicBool,
}

/// Latches taken in one drain.  Consumed in priority order: reset first,
/// so the dispense fast path can never swallow a reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingEvents {
    pub reset: bool,
    pub dispense: bool,
    pub low_battery: bool,
}

impl PendingEvents {
    /// A reset or a battery trip is pending; dispenses alone never are.
    pub fn needs_report(&self) -> bool {
        self.reset || self.low_battery
    }

    pub fn is_empty(&self) -> bool {
        !(self.dispense || self.reset || self.low_battery)
    }
}

impl EventLatches {
    pub const fn new() -> Self {
        Self {
            dispense: AtomicBool::new(false),
            reset: AtomicBool::new(false),
            low_battery: AtomicBool::new(false),
        }
    }

    /// Take and clear every latch.  Each flag is swapped individually so an
    /// edge landing mid-drain is either in this drain or the next one.
    pub fn drain(&self) -> PendingEvents {
        PendingEvents {
            reset: self.reset.swap(false, Ordering::AcqRel),
            dispense: self.dispense.swap(false, Ordering::AcqRel),
            low_battery: self.low_battery.swap(false, Ordering::AcqRel),
        }
    }

    /// Non-destructive view, used when deciding whether a wake was missed.
    pub fn peek(&self) -> PendingEvents {
        PendingEvents {
            reset: self.reset.load(Ordering::Acquire),
            dispense: self.dispense.load(Ordering::Acquire),
            low_battery: self.low_battery.load(Ordering::Acquire),
        }
    }
}

/// Fields shared between interrupt handlers and the control loop.
///
/// Built once at boot and handed out as `&'static` to the ISR trampolines;
/// the loop holds the same reference for its whole run.
#[derive(Debug)]
pub struct SharedState {
    remaining: AtomicU32,
    battery_low: AtomicBool,
    full_count: u32,
    pub latches: EventLatches,
}

impl SharedState {
    pub const fn new(remaining: u32, battery_low: bool, full_count: u32) -> Self {
        Self {
            remaining: AtomicU32::new(remaining),
            battery_low: AtomicBool::new(battery_low),
            full_count,
            latches: EventLatches::new(),
        }
    }

    /// Leak a fresh instance for the lifetime of the program.
    pub fn leak(remaining: u32, battery_low: bool, full_count: u32) -> &'static Self {
        Box::leak(Box::new(Self::new(remaining, battery_low, full_count)))
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }

    pub fn full_count(&self) -> u32 {
        self.full_count
    }

    pub fn battery_low(&self) -> bool {
        self.battery_low.load(Ordering::Acquire)
    }

    /// Loop-side counter restore (volatile wake, reset drain).
    pub fn set_remaining(&self, count: u32) {
        self.remaining.store(count, Ordering::Release);
    }

    /// Loop-side battery state update after the hysteresis decision.
    pub fn set_battery_low(&self, low: bool) {
        self.battery_low.store(low, Ordering::Release);
    }

    fn decrement_remaining(&self) {
        // fetch_update never fails here: the closure always returns Some.
        let _ = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }
}
