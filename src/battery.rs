//! Battery alert hysteresis.
//!
//! Two-sided: a low reading is reported on every report while it persists,
//! a recovery is reported exactly once.
//!
//! | pin reads | stored state | status byte | new stored state |
//! |-----------|--------------|-------------|------------------|
//! | low       | any          | `0x01`      | low              |
//! | healthy   | low          | `0x00`      | healthy          |
//! | healthy   | healthy      | none        | healthy          |

/// Battery status marker carried as the optional third payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatteryStatus {
    /// Battery recovered since the last low alert.
    Stable = 0x00,
    /// Battery below the comparator threshold.
    Low = 0x01,
}

impl BatteryStatus {
    pub const fn marker(self) -> u8 {
        self as u8
    }

    pub const fn describe(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::Low => "low",
        }
    }
}

/// Result of one hysteresis evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatteryDecision {
    /// Status byte to append to this report, if any.
    pub status: Option<BatteryStatus>,
    /// Alert state to record once the report has gone out.
    pub stored_low: bool,
}

/// Decide what to report given the live pin reading and the stored state.
///
/// `pin_low` is the comparator level sampled just before composing the
/// report; `stored_low` is the last recorded alert state.
pub fn evaluate(pin_low: bool, stored_low: bool) -> BatteryDecision {
    if pin_low {
        BatteryDecision {
            status: Some(BatteryStatus::Low),
            stored_low: true,
        }
    } else if stored_low {
        BatteryDecision {
            status: Some(BatteryStatus::Stable),
            stored_low: false,
        }
    } else {
        BatteryDecision {
            status: None,
            stored_low: false,
        }
    }
}
