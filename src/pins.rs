//! GPIO / peripheral pin assignments for the dispenser node board.
//!
//! Every driver references this module rather than hard-coding pin numbers.  Wake-capable inputs must be RTC GPIOs (0–21 on
//! the ESP32-S3) so they still work in deep sleep.

// ---------------------------------------------------------------------------
// Event inputs (all RTC-capable)
// ---------------------------------------------------------------------------

/// Dispense pulse from the valve switch.  Rising edge = one unit dispensed.
/// Doubles as the wake pin.
pub const DISPENSE_GPIO: i32 = 4;

/// Manual refill/reset push-button, active-low with external pull-up.
pub const RESET_GPIO: i32 = 5;

/// Battery comparator output.  LOW = battery below threshold.
pub const LOW_BATTERY_GPIO: i32 = 6;

// ---------------------------------------------------------------------------
// Status output
// ---------------------------------------------------------------------------

/// Awake indicator LED (active HIGH).  Off while sleeping.
pub const STATUS_LED_GPIO: i32 = 15;

// ---------------------------------------------------------------------------
// LoRaWAN modem UART
// ---------------------------------------------------------------------------

pub const MODEM_UART_TX_GPIO: i32 = 17;
pub const MODEM_UART_RX_GPIO: i32 = 18;
/// UART port number used for the modem.
pub const MODEM_UART_PORT: i32 = 1;
/// AT modem default baud rate.
pub const MODEM_UART_BAUD: u32 = 115_200;

/// Whether `pin` can wake the chip from deep sleep.
pub const fn is_rtc_gpio(pin: i32) -> bool {
    pin >= 0 && pin <= 21
}
