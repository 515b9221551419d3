//! ESP32-S3 platform adapter.
//!
//! Implements [`PlatformPort`] on top of the raw GPIO helpers in
//! [`drivers::hw_init`](crate::drivers::hw_init), the sleep primitives in
//! [`power`](crate::power) and the RTC clock.
//!
//! On host builds the same type runs against the simulation backends:
//! inputs rest at their idle levels, every sleep runs to its timer and the
//! clock advances by exactly the requested duration.  Retained state lives
//! in RTC slow memory on target and in a plain field off-target.

use embedded_hal::digital::InputPin;
use log::{info, warn};

use crate::app::ports::{PlatformError, PlatformPort, RetainedState};
use crate::drivers::hw_init::{self, HwInitError, IsrBinding, RawInput};
use crate::events::{Edge, EdgeHandler, SharedState};
use crate::pins;
use crate::power::PowerManager;
use crate::scheduler::{SleepRequest, WakeCause};

use super::time::RtcClock;

/// Highest GPIO number on the ESP32-S3.
const MAX_GPIO: i32 = 48;

impl From<HwInitError> for PlatformError {
    fn from(e: HwInitError) -> Self {
        Self::Sdk(e.code())
    }
}

// ── RTC retention ─────────────────────────────────────────────

/// Slot in RTC slow memory.  It is loaded from the image on power-on and
/// left alone across deep sleep, so the magic word tells the two apart.
#[cfg(target_os = "espidf")]
mod rtc_slot {
    use core::cell::UnsafeCell;

    use crate::app::ports::RetainedState;

    const MAGIC: u32 = 0x4450_4E31;

    #[derive(Clone, Copy)]
    struct Slot {
        magic: u32,
        state: RetainedState,
    }

    struct RtcCell(UnsafeCell<Slot>);

    // SAFETY: only the loop task touches the slot, never an ISR.
    unsafe impl Sync for RtcCell {}

    #[unsafe(link_section = ".rtc.data")]
    static SLOT: RtcCell = RtcCell(UnsafeCell::new(Slot {
        magic: 0,
        state: RetainedState {
            report_deadline: None,
            dispense_high: false,
            low_pending: false,
        },
    }));

    pub fn store(state: RetainedState) {
        // SAFETY: single accessor, see `RtcCell`.
        unsafe {
            *SLOT.0.get() = Slot {
                magic: MAGIC,
                state,
            };
        }
    }

    pub fn load() -> Option<RetainedState> {
        // SAFETY: single accessor, see `RtcCell`.
        let slot = unsafe { *SLOT.0.get() };
        (slot.magic == MAGIC).then_some(slot.state)
    }
}

/// [`PlatformPort`] for the dispenser board.
pub struct EspPlatform {
    power: PowerManager,
    clock: RtcClock,
    bindings: heapless::Vec<&'static IsrBinding, 4>,
    indicator: bool,
    #[cfg(not(target_os = "espidf"))]
    retained: Option<RetainedState>,
}

impl EspPlatform {
    /// Configure the event inputs and the LED and install the ISR service.
    pub fn new() -> Result<Self, HwInitError> {
        hw_init::init_peripherals()?;
        hw_init::init_isr_service()?;
        Ok(Self {
            power: PowerManager::new(pins::DISPENSE_GPIO, pins::RESET_GPIO),
            clock: RtcClock::new(),
            bindings: heapless::Vec::new(),
            indicator: false,
            #[cfg(not(target_os = "espidf"))]
            retained: None,
        })
    }

    /// Handlers attached so far, in registration order.
    pub fn bindings(&self) -> &[&'static IsrBinding] {
        &self.bindings
    }

    /// Last level driven on the awake indicator.
    pub fn indicator(&self) -> bool {
        self.indicator
    }
}

impl PlatformPort for EspPlatform {
    fn register_edge_handler(
        &mut self,
        pin: i32,
        edge: Edge,
        handler: EdgeHandler,
        shared: &'static SharedState,
    ) -> Result<(), PlatformError> {
        if !(0..=MAX_GPIO).contains(&pin) {
            return Err(PlatformError::InvalidPin(pin));
        }
        let binding = hw_init::attach_edge_handler(pin, edge, handler, shared)?;
        if self.bindings.push(binding).is_err() {
            warn!("platform: binding table full, GPIO{} not tracked", pin);
        }
        Ok(())
    }

    fn set_wake_pin(&mut self, pin: i32) -> Result<(), PlatformError> {
        if !pins::is_rtc_gpio(pin) {
            return Err(PlatformError::InvalidPin(pin));
        }
        self.power.set_dispense_pin(pin);
        info!("platform: wake pin GPIO{}", pin);
        Ok(())
    }

    fn enter_low_power_mode(&mut self, request: &SleepRequest) -> WakeCause {
        let cause = self.power.enter(request);
        #[cfg(not(target_os = "espidf"))]
        self.clock.advance(u64::from(request.duration_secs));
        cause
    }

    fn monotonic_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    fn read_pin(&mut self, pin: i32) -> bool {
        let Ok(high) = RawInput(pin).is_high();
        high
    }

    fn boot_wake_cause(&self) -> WakeCause {
        self.power.boot_wake_cause()
    }

    fn set_awake_indicator(&mut self, on: bool) {
        self.indicator = on;
        hw_init::gpio_write(pins::STATUS_LED_GPIO, on);
    }

    #[cfg(target_os = "espidf")]
    fn retain(&mut self, state: RetainedState) {
        rtc_slot::store(state);
    }

    #[cfg(target_os = "espidf")]
    fn retained(&self) -> Option<RetainedState> {
        rtc_slot::load()
    }

    #[cfg(not(target_os = "espidf"))]
    fn retain(&mut self, state: RetainedState) {
        self.retained = Some(state);
    }

    #[cfg(not(target_os = "espidf"))]
    fn retained(&self) -> Option<RetainedState> {
        self.retained
    }
}
