//! ESP32 RTC clock adapter.
//!
//! Provides the seconds counter the scheduler anchors deadlines to.  It
//! must keep counting through light sleep *and* deep sleep, which rules
//! out `esp_timer_get_time()` (reset on every deep-sleep restart).
//!
//! - **`target_os = "espidf"`**: reads `gettimeofday()`, which ESP-IDF
//!   backs with the RTC slow clock and carries across deep sleep.
//! - **`not(target_os = "espidf")`**: a manual clock advanced by the
//!   simulated sleep primitive, so host runs never wait on wall time.

#[cfg(not(target_os = "espidf"))]
use core::cell::Cell;

/// RTC-backed clock for the ESP32-S3.
pub struct RtcClock {
    #[cfg(not(target_os = "espidf"))]
    now: Cell<u64>,
}

impl Default for RtcClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RtcClock {
    pub fn new() -> Self {
        Self {
            #[cfg(not(target_os = "espidf"))]
            now: Cell::new(0),
        }
    }

    /// Seconds on the RTC.  Monotonic across every sleep depth as long as
    /// nothing sets the wall clock.
    #[cfg(target_os = "espidf")]
    pub fn now_secs(&self) -> u64 {
        let mut tv = esp_idf_svc::sys::timeval {
            tv_sec: 0,
            tv_usec: 0,
        };
        // SAFETY: gettimeofday writes only into `tv`; a null timezone
        // pointer is permitted.
        if unsafe { esp_idf_svc::sys::gettimeofday(&mut tv, core::ptr::null_mut()) } != 0 {
            return 0;
        }
        tv.tv_sec.max(0) as u64
    }

    /// Simulated seconds.
    #[cfg(not(target_os = "espidf"))]
    pub fn now_secs(&self) -> u64 {
        self.now.get()
    }

    /// Advance the simulated clock.  Only the sim sleep path calls this.
    #[cfg(not(target_os = "espidf"))]
    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get().saturating_add(secs));
    }
}
