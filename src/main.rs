//! Dispenser Node Firmware: main entry point
//!
//! Hexagonal architecture around a single power-aware control loop.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  LoraModem         NvsCounterStore   EspPlatform   LogEventSink│
//! │  (NetworkPort)     (CounterStore)    (Platform)    (EventSink) │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │              ControlLoop (pure logic)                  │    │
//! │  │  FSM · SleepScheduler · battery · payload              │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  GPIO ISRs ──▶ SharedState (atomics) ──▶ drained each wake     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A volatile (deep) sleep never returns: the chip restarts here and the
//! loop boots warm.
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use esp_idf_hal::gpio::AnyIOPin;
use esp_idf_hal::peripherals::Peripherals;
use esp_idf_hal::uart::{config::Config as UartConfig, UartDriver};
use esp_idf_hal::units::Hertz;

use dispenser::adapters::counter_store::NvsCounterStore;
use dispenser::adapters::device_id;
use dispenser::adapters::log_sink::LogEventSink;
use dispenser::adapters::lora_modem::{LoraModem, UartTransport};
use dispenser::adapters::nvs::NvsAdapter;
use dispenser::adapters::platform::EspPlatform;
use dispenser::app::ports::{ConfigPort, NetworkCredentials};
use dispenser::app::service::ControlLoop;
use dispenser::config::DeviceConfig;
use dispenser::events::SharedState;
use dispenser::pins;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    let mac = device_id::read_mac();
    info!("╔══════════════════════════════════════╗");
    info!("║  Dispenser Node v{} ({})    ║", env!("CARGO_PKG_VERSION"), device_id::device_label(&mac));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Load config from NVS (or defaults) ─────────────────
    let nvs = NvsAdapter::new()?;
    let config = match nvs.load() {
        Ok(cfg) => {
            info!("Config loaded from NVS");
            cfg
        }
        Err(e) => {
            warn!("NVS config load failed ({}), using defaults", e);
            DeviceConfig::default()
        }
    };

    // ── 3. Peripherals ────────────────────────────────────────
    let mut platform = EspPlatform::new()?;

    let peripherals = Peripherals::take()?;
    let uart_config = UartConfig::default().baudrate(Hertz(pins::MODEM_UART_BAUD));
    // uart1 on GPIO17/18, see pins::MODEM_UART_*
    let uart = UartDriver::new(
        peripherals.uart1,
        peripherals.pins.gpio17,
        peripherals.pins.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &uart_config,
    )?;
    let mut modem = LoraModem::new(UartTransport::new(uart), config.app_port);

    // ── 4. Shared interrupt state + control loop ──────────────
    // Boot overwrites both values from the counter store before any
    // handler is attached.
    let shared = SharedState::leak(config.full_count, false, config.full_count);
    let mut store = NvsCounterStore::new(nvs);
    let mut sink = LogEventSink::new();

    let credentials =
        NetworkCredentials::from_config(&config).with_dev_eui(device_id::dev_eui(&mac));
    let mut control = ControlLoop::new(config, shared).with_credentials(credentials);
    control.boot(&mut modem, &mut store, &mut platform, &mut sink);

    // ── 5. Run forever ────────────────────────────────────────
    loop {
        control.run_cycle(&mut modem, &mut store, &mut platform, &mut sink);
    }
}
