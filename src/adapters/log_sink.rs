//! Log-based event sink adapter.
//!
//! Implements [`EventSink`] by writing structured application events to
//! the ESP-IDF logger (which goes to UART / USB-CDC in production).

use log::{debug, info};

use crate::app::events::AppEvent;
use crate::app::ports::EventSink;
use crate::scheduler::WakeCause;

/// Adapter that logs every [`AppEvent`] to the serial console.
pub struct LogEventSink;

impl Default for LogEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &AppEvent) {
        match event {
            AppEvent::Started {
                warm,
                remaining,
                interval_secs,
            } => {
                info!(
                    "START | {} boot | remaining={} | interval={}s",
                    if *warm { "warm" } else { "cold" },
                    remaining,
                    interval_secs,
                );
            }
            AppEvent::StateChanged { from, to } => {
                debug!("STATE | {:?} -> {:?}", from, to);
            }
            AppEvent::DispenseCounted { remaining } => {
                info!("COUNT | remaining={}", remaining);
            }
            AppEvent::CounterReset { full_count } => {
                info!("RESET | counter refilled to {}", full_count);
            }
            AppEvent::Joined => {
                info!("JOIN  | network session established");
            }
            AppEvent::ReportSent { payload, battery } => {
                info!(
                    "UPLNK | payload={:02X?} | battery={}",
                    payload.as_slice(),
                    match battery {
                        Some(status) => status.describe(),
                        None => "-",
                    },
                );
            }
            // Already logged at warn level where it was raised.
            AppEvent::Failure(e) => {
                debug!("FAIL  | {}: {}", e.kind(), e);
            }
            AppEvent::Sleeping { secs, depth } => {
                info!("SLEEP | {}s ({:?})", secs, depth);
            }
            AppEvent::Woke(cause) => match cause {
                WakeCause::Interrupt { pin: Some(pin) } => info!("WAKE  | GPIO{}", pin),
                other => info!("WAKE  | {:?}", other),
            },
        }
    }
}
