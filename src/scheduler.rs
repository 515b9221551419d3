//! Sleep scheduling.
//!
//! The reporting cadence is anchored to the wake that started a report
//! cycle: the next deadline is `cycle_start + interval`, so time spent
//! joining and transmitting comes out of the sleep rather than stretching
//! the period.  Dispense-only wakes go back to sleep until the same
//! deadline.
//!
//! ```text
//!  report        dispense   dispense          report
//!    │──────────────│──────────│──────────────────│
//!    ▲ cycle_start  ▲ sleep(deadline − now)       ▲ deadline
//! ```
//!
//! Sleep depth is fixed configuration; duration and wake mask are
//! recomputed every cycle.

use serde::{Deserialize, Serialize};

/// Which sources may end a sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WakeSource {
    /// RTC timer only; edges during sleep are counted but do not wake.
    TimerOnly,
    /// Wake pin only; the reporting deadline is checked on the next edge.
    InterruptOnly,
    /// Whichever comes first.
    TimerOrInterrupt,
}

impl WakeSource {
    pub const fn timer(self) -> bool {
        matches!(self, Self::TimerOnly | Self::TimerOrInterrupt)
    }

    pub const fn interrupt(self) -> bool {
        matches!(self, Self::InterruptOnly | Self::TimerOrInterrupt)
    }
}

/// Low-power mode depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SleepDepth {
    /// RAM and IO state retained; execution resumes after the sleep call.
    RetainMemory,
    /// RAM lost; execution restarts from reset and the session must be
    /// restored from storage.
    Volatile,
}

impl SleepDepth {
    pub const fn retains_memory(self) -> bool {
        matches!(self, Self::RetainMemory)
    }
}

/// A fully-computed request for the platform's sleep primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    pub duration_secs: u32,
    pub wake_source: WakeSource,
    pub depth: SleepDepth,
}

/// What ended a sleep, as far as the platform can tell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeCause {
    /// First boot or reset; no sleep preceded this wake.
    PowerOn,
    /// RTC timer expired.
    Timer,
    /// A wake-capable pin fired.  `pin` is `None` when the platform cannot
    /// tell which one.
    Interrupt { pin: Option<i32> },
}

/// Computes sleep durations and deadlines.
#[derive(Debug, Clone, Copy)]
pub struct SleepScheduler {
    min_sleep_secs: u32,
    wake_source: WakeSource,
    depth: SleepDepth,
}

impl SleepScheduler {
    /// `min_sleep_secs` is raised to 1 if zero is passed.
    pub fn new(min_sleep_secs: u32, wake_source: WakeSource, depth: SleepDepth) -> Self {
        Self {
            min_sleep_secs: min_sleep_secs.max(1),
            wake_source,
            depth,
        }
    }

    pub fn depth(&self) -> SleepDepth {
        self.depth
    }

    pub fn wake_source(&self) -> WakeSource {
        self.wake_source
    }

    /// Deadline of the next report for a cycle that started at `cycle_start`.
    pub fn next_deadline(&self, cycle_start: u64, interval_secs: u32) -> u64 {
        cycle_start.saturating_add(u64::from(interval_secs))
    }

    /// `interval − elapsed_since_wake`, floored at the minimum.
    pub fn sleep_duration(&self, interval_secs: u32, elapsed_since_wake: u64) -> u32 {
        let remaining = u64::from(interval_secs).saturating_sub(elapsed_since_wake);
        (remaining.min(u64::from(u32::MAX)) as u32).max(self.min_sleep_secs)
    }

    /// Time left until `deadline`, floored at the minimum.
    pub fn remaining_until(&self, now: u64, deadline: u64) -> u32 {
        let remaining = deadline.saturating_sub(now);
        (remaining.min(u64::from(u32::MAX)) as u32).max(self.min_sleep_secs)
    }

    /// Whether the reporting deadline has passed.  An unknown deadline
    /// (cold boot, RTC memory lost) counts as passed.
    pub fn deadline_elapsed(&self, now: u64, deadline: Option<u64>) -> bool {
        deadline.is_none_or(|d| now >= d)
    }

    /// Package a duration with the configured wake mask and depth.
    pub fn request(&self, duration_secs: u32) -> SleepRequest {
        SleepRequest {
            duration_secs,
            wake_source: self.wake_source,
            depth: self.depth,
        }
    }
}
