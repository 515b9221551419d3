//! One-shot GPIO initialization and edge-interrupt wiring.
//!
//! Configures the three event inputs and the status LED using raw ESP-IDF
//! sys calls, then installs the per-pin ISR service.  Called once from
//! boot before the first cycle runs.

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
use log::info;

use crate::events::{Edge, EdgeHandler, SharedState};
use crate::pins;

// ── Error type ────────────────────────────────────────────────

/// Errors during peripheral initialization or handler registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HwInitError {
    GpioConfigFailed(i32),
    IsrInstallFailed(i32),
    IsrAddFailed(i32),
}

impl HwInitError {
    /// Raw ESP-IDF return code behind the failure.
    pub fn code(self) -> i32 {
        match self {
            Self::GpioConfigFailed(rc) | Self::IsrInstallFailed(rc) | Self::IsrAddFailed(rc) => rc,
        }
    }
}

impl core::fmt::Display for HwInitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::GpioConfigFailed(rc) => write!(f, "GPIO config failed (rc={})", rc),
            Self::IsrInstallFailed(rc) => write!(f, "GPIO ISR service install failed (rc={})", rc),
            Self::IsrAddFailed(rc) => write!(f, "GPIO ISR handler add failed (rc={})", rc),
        }
    }
}

impl std::error::Error for HwInitError {}

// ── Peripherals ───────────────────────────────────────────────

#[cfg(target_os = "espidf")]
pub fn init_peripherals() -> Result<(), HwInitError> {
    // SAFETY: Called once during boot before any handler is attached;
    // single-threaded.
    unsafe {
        init_gpio_inputs()?;
        init_gpio_outputs()?;
    }
    info!("hw_init: event inputs and status LED configured");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_peripherals() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): peripheral init skipped");
    Ok(())
}

// ── GPIO Inputs ───────────────────────────────────────────────

/// Idle level of each event input.  The dispense pulse is active-high;
/// reset and battery trip are open-drain active-low.
const INPUTS: [(i32, bool); 3] = [
    (pins::DISPENSE_GPIO, false),
    (pins::RESET_GPIO, true),
    (pins::LOW_BATTERY_GPIO, true),
];

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_inputs() -> Result<(), HwInitError> {
    for &(pin, idle_high) in &INPUTS {
        let cfg = gpio_config_t {
            pin_bit_mask: 1u64 << pin,
            mode: gpio_mode_t_GPIO_MODE_INPUT,
            pull_up_en: if idle_high {
                gpio_pullup_t_GPIO_PULLUP_ENABLE
            } else {
                gpio_pullup_t_GPIO_PULLUP_DISABLE
            },
            pull_down_en: if idle_high {
                gpio_pulldown_t_GPIO_PULLDOWN_DISABLE
            } else {
                gpio_pulldown_t_GPIO_PULLDOWN_ENABLE
            },
            intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
        };
        let ret = unsafe { gpio_config(&cfg) };
        if ret != ESP_OK as i32 { return Err(HwInitError::GpioConfigFailed(ret)); }
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_read(pin: i32) -> bool {
    // SAFETY: gpio_get_level is a read-only register access on an
    // already-configured input pin.
    (unsafe { gpio_get_level(pin) }) != 0
}

/// Simulation: every input rests at its idle level.
#[cfg(not(target_os = "espidf"))]
pub fn gpio_read(pin: i32) -> bool {
    INPUTS
        .iter()
        .find(|&&(p, _)| p == pin)
        .is_some_and(|&(_, idle_high)| idle_high)
}

/// An input configured by [`init_peripherals`], read through the
/// embedded-hal digital traits.
#[derive(Debug, Clone, Copy)]
pub struct RawInput(pub i32);

impl embedded_hal::digital::ErrorType for RawInput {
    type Error = core::convert::Infallible;
}

impl embedded_hal::digital::InputPin for RawInput {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(gpio_read(self.0))
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!gpio_read(self.0))
    }
}

// ── GPIO Outputs ──────────────────────────────────────────────

#[cfg(target_os = "espidf")]
unsafe fn init_gpio_outputs() -> Result<(), HwInitError> {
    let cfg = gpio_config_t {
        pin_bit_mask: 1u64 << pins::STATUS_LED_GPIO,
        mode: gpio_mode_t_GPIO_MODE_OUTPUT,
        pull_up_en: gpio_pullup_t_GPIO_PULLUP_DISABLE,
        pull_down_en: gpio_pulldown_t_GPIO_PULLDOWN_DISABLE,
        intr_type: gpio_int_type_t_GPIO_INTR_DISABLE,
    };
    let ret = unsafe { gpio_config(&cfg) };
    if ret != ESP_OK as i32 { return Err(HwInitError::GpioConfigFailed(ret)); }
    // The LED must stay driven through light sleep, otherwise it floats.
    unsafe {
        gpio_set_level(pins::STATUS_LED_GPIO, 0);
        gpio_hold_en(pins::STATUS_LED_GPIO);
    }
    Ok(())
}

#[cfg(target_os = "espidf")]
pub fn gpio_write(pin: i32, high: bool) {
    // SAFETY: the pin was configured as output in init_gpio_outputs().
    // Hold is released for the write and re-armed so the level survives
    // the next sleep.
    unsafe {
        gpio_hold_dis(pin);
        gpio_set_level(pin, u32::from(high));
        gpio_hold_en(pin);
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn gpio_write(_pin: i32, _high: bool) {}

// ── GPIO ISR Service ──────────────────────────────────────────

/// What a trampoline needs: the handler and the state it mutates.
/// Leaked once per registration and never freed.
#[derive(Debug)]
pub struct IsrBinding {
    pub handler: EdgeHandler,
    pub shared: &'static SharedState,
}

#[cfg(target_os = "espidf")]
unsafe extern "C" fn edge_isr(arg: *mut core::ffi::c_void) {
    // SAFETY: `arg` is the `&'static IsrBinding` leaked in
    // attach_edge_handler(); it is never freed or mutated.
    let binding = unsafe { &*(arg as *const IsrBinding) };
    binding.handler.fire(binding.shared);
}

/// Install the per-pin GPIO ISR service.  Call after init_peripherals()
/// and before any handler is attached.
#[cfg(target_os = "espidf")]
pub fn init_isr_service() -> Result<(), HwInitError> {
    // SAFETY: ESP_ERR_INVALID_STATE means the service is already installed,
    // which is acceptable.
    let ret = unsafe { gpio_install_isr_service(0) };
    if ret != ESP_OK && ret != ESP_ERR_INVALID_STATE {
        return Err(HwInitError::IsrInstallFailed(ret));
    }
    info!("hw_init: ISR service installed");
    Ok(())
}

#[cfg(not(target_os = "espidf"))]
pub fn init_isr_service() -> Result<(), HwInitError> {
    log::info!("hw_init(sim): ISR service skipped");
    Ok(())
}

/// Attach `handler` to `pin` on `edge`.  Returns the leaked binding so the
/// caller can keep it for simulation or diagnostics.
#[cfg(target_os = "espidf")]
pub fn attach_edge_handler(
    pin: i32,
    edge: Edge,
    handler: EdgeHandler,
    shared: &'static SharedState,
) -> Result<&'static IsrBinding, HwInitError> {
    let binding: &'static IsrBinding = Box::leak(Box::new(IsrBinding { handler, shared }));
    let intr = match edge {
        Edge::Rising => gpio_int_type_t_GPIO_INTR_POSEDGE,
        Edge::Falling => gpio_int_type_t_GPIO_INTR_NEGEDGE,
    };
    // SAFETY: `binding` lives for the rest of the program; the trampoline
    // only reads it and touches atomics.
    unsafe {
        let ret = gpio_set_intr_type(pin, intr);
        if ret != ESP_OK as i32 { return Err(HwInitError::IsrAddFailed(ret)); }
        let arg = core::ptr::from_ref(binding).cast_mut().cast::<core::ffi::c_void>();
        let ret = gpio_isr_handler_add(pin, Some(edge_isr), arg);
        if ret != ESP_OK as i32 { return Err(HwInitError::IsrAddFailed(ret)); }
        let ret = gpio_intr_enable(pin);
        if ret != ESP_OK as i32 { return Err(HwInitError::IsrAddFailed(ret)); }
    }
    info!("hw_init: {:?} attached to GPIO{} ({:?})", handler, pin, edge);
    Ok(binding)
}

#[cfg(not(target_os = "espidf"))]
pub fn attach_edge_handler(
    pin: i32,
    edge: Edge,
    handler: EdgeHandler,
    shared: &'static SharedState,
) -> Result<&'static IsrBinding, HwInitError> {
    log::debug!("hw_init(sim): {:?} on GPIO{} ({:?})", handler, pin, edge);
    Ok(Box::leak(Box::new(IsrBinding { handler, shared })))
}
