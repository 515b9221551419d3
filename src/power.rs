//! Low-power mode entry and wake-cause decoding.
//!
//! Two depths, one wake mask:
//!
//! | depth          | primitive                | interrupt wake sources          |
//! |----------------|--------------------------|---------------------------------|
//! | `RetainMemory` | `esp_light_sleep_start`  | GPIO level wake on both pins    |
//! | `Volatile`     | `esp_deep_sleep_start`   | EXT0 (dispense) + EXT1 (reset)  |
//!
//! Every entry first clears all previously armed sources so a mask from an
//! earlier cycle never leaks into this one.  The dispense pin is armed on
//! the level opposite to the one it rests at, so a pulse still high at
//! sleep entry wakes the MCU once when it ends instead of immediately.
//! Decoding the wake reason is a pure function over [`RawWakeup`] so it
//! runs under host tests.

use log::{debug, info};

use crate::drivers::hw_init;
use crate::scheduler::{SleepRequest, WakeCause};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// The SoC's wake reason, before it is mapped onto [`WakeCause`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawWakeup {
    /// Not a wake from sleep (power-on, reset, brown-out).
    Undefined,
    Timer,
    /// RTC IO wake on the single EXT0 pin.
    Ext0,
    /// RTC IO wake on the EXT1 mask; `status` is the triggering pin mask.
    Ext1 { status: u64 },
    /// Light-sleep GPIO wake.  The SoC does not say which pin.
    Gpio,
    /// Any other source (touch, ULP, UART).
    Other(u32),
}

/// Map a raw wake reason to a [`WakeCause`].  `ext0_pin` is the pin armed
/// as EXT0, which the SoC does not report back.
pub fn decode(raw: RawWakeup, ext0_pin: i32) -> WakeCause {
    match raw {
        RawWakeup::Undefined => WakeCause::PowerOn,
        RawWakeup::Timer | RawWakeup::Other(_) => WakeCause::Timer,
        RawWakeup::Ext0 => WakeCause::Interrupt { pin: Some(ext0_pin) },
        RawWakeup::Ext1 { status } if status != 0 => WakeCause::Interrupt {
            pin: Some(status.trailing_zeros() as i32),
        },
        RawWakeup::Ext1 { .. } | RawWakeup::Gpio => WakeCause::Interrupt { pin: None },
    }
}

/// Level that wakes the MCU on the dispense pin, given its level now.
pub fn dispense_wake_level(high_now: bool) -> bool {
    !high_now
}

/// Owner of the sleep primitives.
pub struct PowerManager {
    dispense_pin: i32,
    reset_pin: i32,
}

impl PowerManager {
    pub fn new(dispense_pin: i32, reset_pin: i32) -> Self {
        Self {
            dispense_pin,
            reset_pin,
        }
    }

    /// Pin armed as the level wake for dispense pulses (EXT0 in deep sleep).
    pub fn dispense_pin(&self) -> i32 {
        self.dispense_pin
    }

    pub fn set_dispense_pin(&mut self, pin: i32) {
        self.dispense_pin = pin;
    }

    /// Why this boot happened.  Valid until the next sleep.
    pub fn boot_wake_cause(&self) -> WakeCause {
        decode(read_raw_wakeup(), self.dispense_pin)
    }

    /// Arm the requested sources and suspend.
    ///
    /// A retained request returns the decoded wake cause.  On hardware a
    /// volatile request never returns; the next boot reports the cause
    /// through [`Self::boot_wake_cause`].
    pub fn enter(&mut self, request: &SleepRequest) -> WakeCause {
        self.arm(request);
        info!(
            "power: sleeping {}s (timer={} pins={} retain={})",
            request.duration_secs,
            request.wake_source.timer(),
            request.wake_source.interrupt(),
            request.depth.retains_memory(),
        );
        let cause = self.suspend(request);
        debug!("power: woke by {:?}", cause);
        cause
    }

    // ── Hardware ──────────────────────────────────────────────

    #[cfg(target_os = "espidf")]
    fn arm(&self, request: &SleepRequest) {
        let wake_high = dispense_wake_level(hw_init::gpio_read(self.dispense_pin));
        // SAFETY: the sleep subsystem is only touched from the loop task,
        // immediately before suspending; pins were configured at boot.
        unsafe {
            esp_sleep_disable_wakeup_source(esp_sleep_source_t_ESP_SLEEP_WAKEUP_ALL);

            if request.wake_source.timer() {
                esp_sleep_enable_timer_wakeup(u64::from(request.duration_secs) * 1_000_000);
            }

            if request.wake_source.interrupt() {
                if request.depth.retains_memory() {
                    let level = if wake_high {
                        gpio_int_type_t_GPIO_INTR_HIGH_LEVEL
                    } else {
                        gpio_int_type_t_GPIO_INTR_LOW_LEVEL
                    };
                    gpio_wakeup_enable(self.dispense_pin, level);
                    gpio_wakeup_enable(self.reset_pin, gpio_int_type_t_GPIO_INTR_LOW_LEVEL);
                    esp_sleep_enable_gpio_wakeup();
                } else {
                    esp_sleep_enable_ext0_wakeup(self.dispense_pin, i32::from(wake_high));
                    esp_sleep_enable_ext1_wakeup(
                        1u64 << self.reset_pin,
                        esp_sleep_ext1_wakeup_mode_t_ESP_EXT1_WAKEUP_ANY_LOW,
                    );
                }
            }
        }
    }

    #[cfg(target_os = "espidf")]
    fn suspend(&mut self, request: &SleepRequest) -> WakeCause {
        if request.depth.retains_memory() {
            // SAFETY: sources were armed above; execution resumes here.
            unsafe {
                esp_light_sleep_start();
            }
            decode(read_raw_wakeup(), self.dispense_pin)
        } else {
            // SAFETY: counters are in flash and the loop state is in the
            // RTC slot; nothing else has to survive the restart.
            unsafe {
                esp_deep_sleep_start();
            }
        }
    }

    // ── Simulation ────────────────────────────────────────────

    #[cfg(not(target_os = "espidf"))]
    fn arm(&self, request: &SleepRequest) {
        let wake_high = dispense_wake_level(hw_init::gpio_read(self.dispense_pin));
        debug!(
            "power(sim): arm dispense=GPIO{} (wake {}) reset=GPIO{} for {:?}",
            self.dispense_pin,
            if wake_high { "high" } else { "low" },
            self.reset_pin,
            request.wake_source
        );
    }

    /// Simulation: every sleep runs to its timer.
    #[cfg(not(target_os = "espidf"))]
    fn suspend(&mut self, _request: &SleepRequest) -> WakeCause {
        WakeCause::Timer
    }
}

#[cfg(target_os = "espidf")]
fn read_raw_wakeup() -> RawWakeup {
    // SAFETY: read-only queries of the sleep subsystem.
    let cause = unsafe { esp_sleep_get_wakeup_cause() };
    #[allow(non_upper_case_globals)]
    match cause {
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_UNDEFINED => RawWakeup::Undefined,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_TIMER => RawWakeup::Timer,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT0 => RawWakeup::Ext0,
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_EXT1 => RawWakeup::Ext1 {
            status: unsafe { esp_sleep_get_ext1_wakeup_status() },
        },
        esp_sleep_source_t_ESP_SLEEP_WAKEUP_GPIO => RawWakeup::Gpio,
        other => RawWakeup::Other(other),
    }
}

/// Simulation: the process always starts from power-on.
#[cfg(not(target_os = "espidf"))]
fn read_raw_wakeup() -> RawWakeup {
    RawWakeup::Undefined
}
