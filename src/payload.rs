//! Uplink payload composition.
//!
//! ```text
//!  byte 0      byte 1      byte 2 (optional)
//! ┌──────────┬──────────┬──────────────────┐
//! │ count hi │ count lo │ battery marker   │
//! └──────────┴──────────┴──────────────────┘
//! ```
//!
//! The count is the dispenses remaining, big-endian.  The marker is
//! present only when [`battery::evaluate`](crate::battery::evaluate) says a
//! notification is due.

use crate::battery::BatteryStatus;

/// Longest payload the composer produces.
pub const MAX_PAYLOAD_LEN: usize = 3;

pub type Payload = heapless::Vec<u8, MAX_PAYLOAD_LEN>;

/// Build a report.  Counts above `u16::MAX` saturate; configuration
/// validation keeps `full_count` inside 16 bits so this never triggers in
/// the field.
pub fn compose(remaining: u32, status: Option<BatteryStatus>) -> Payload {
    let count = u16::try_from(remaining).unwrap_or(u16::MAX);
    let mut out = Payload::new();
    // Capacity is 3 and at most 3 bytes are pushed.
    let _ = out.extend_from_slice(&count.to_be_bytes());
    if let Some(status) = status {
        let _ = out.push(status.marker());
    }
    out
}
