//! Port traits: the hexagonal boundary between the control loop and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ ControlLoop (domain)
//! ```
//!
//! Driven adapters (LoRaWAN modem, NVS, sleep/interrupt platform, event
//! sinks) implement these traits.  The
//! [`ControlLoop`](super::service::ControlLoop) consumes them via generics,
//! so the loop never touches hardware directly and runs unchanged against
//! the mocks in `tests/`.
//!
//! ## Blocking
//!
//! - [`NetworkPort::join`] and [`NetworkPort::transmit`] may block for
//!   bounded protocol timeouts and are not cancellable.
//! - [`PlatformPort::enter_low_power_mode`] suspends the whole program until
//!   a wake source fires.  It is the only unbounded suspension point.

use crate::config::DeviceConfig;
use crate::events::{Edge, EdgeHandler, SharedState};
use crate::scheduler::{SleepRequest, WakeCause};

// ───────────────────────────────────────────────────────────────
// Network port (driven adapter: domain ↔ LoRaWAN stack)
// ───────────────────────────────────────────────────────────────

/// LoRaWAN join mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Over-the-air activation.
    Otaa,
}

/// Network credentials and channel plan handed to the stack once at
/// provisioning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkCredentials {
    /// Device EUI.  `None` keeps the identity burned into the radio module.
    pub dev_eui: Option<[u8; 8]>,
    /// Join EUI (a.k.a. AppEUI / network id).
    pub join_eui: [u8; 8],
    /// Application root key.
    pub app_key: [u8; 16],
    /// Frequency sub-band (0 = all channels).
    pub frequency_sub_band: u8,
    /// Public vs. private LoRaWAN sync word.
    pub public_network: bool,
    /// Request confirmed uplinks.
    pub confirmed_uplinks: bool,
}

impl NetworkCredentials {
    /// Extract the credential block from the device configuration.
    pub fn from_config(config: &DeviceConfig) -> Self {
        Self {
            dev_eui: None,
            join_eui: config.join_eui,
            app_key: config.app_key,
            frequency_sub_band: config.frequency_sub_band,
            public_network: config.public_network,
            confirmed_uplinks: config.confirmed_uplinks,
        }
    }

    /// Use `dev_eui` instead of the radio module's own identity.
    pub fn with_dev_eui(mut self, dev_eui: [u8; 8]) -> Self {
        self.dev_eui = Some(dev_eui);
        self
    }
}

/// The LoRaWAN session as seen by the control loop.
///
/// The first seven methods are the per-cycle surface; the remainder are
/// one-time provisioning calls made on cold boot.
pub trait NetworkPort {
    /// Whether a network session is currently established.
    fn is_joined(&mut self) -> bool;

    /// Perform a join.  Blocks until accepted, denied, or timed out.
    fn join(&mut self) -> Result<(), NetworkError>;

    /// Send one uplink.  Blocks until the stack reports completion.
    fn transmit(&mut self, payload: &[u8]) -> Result<(), NetworkError>;

    /// Persist the session so a volatile sleep does not force a rejoin.
    fn save_session(&mut self) -> Result<(), NetworkError>;

    /// Restore a previously saved session after a volatile wake.
    fn restore_session(&mut self) -> Result<(), NetworkError>;

    /// Select the uplink data rate index.
    fn set_data_rate(&mut self, rate: u8) -> Result<(), NetworkError>;

    /// Enable or disable regulatory duty-cycle enforcement.
    fn set_duty_cycle_enforced(&mut self, enforced: bool) -> Result<(), NetworkError>;

    /// Restore factory radio configuration.
    fn reset_config(&mut self) -> Result<(), NetworkError>;

    /// Drop any existing session state.
    fn reset_session(&mut self) -> Result<(), NetworkError>;

    /// Select the activation mode.
    fn set_join_mode(&mut self, mode: JoinMode) -> Result<(), NetworkError>;

    /// Install credentials and channel plan.
    fn set_credentials(&mut self, credentials: &NetworkCredentials) -> Result<(), NetworkError>;

    /// Enable or disable adaptive data rate.
    fn set_adr(&mut self, enabled: bool) -> Result<(), NetworkError>;

    /// Persist the radio configuration inside the stack.
    fn save_config(&mut self) -> Result<(), NetworkError>;
}

// ───────────────────────────────────────────────────────────────
// Counter store port (driven adapter: domain ↔ durable counters)
// ───────────────────────────────────────────────────────────────

/// Durable holder of the dispense counter, report interval and battery
/// alert state.  Values survive volatile sleep and power loss.
///
/// Getters return the supplied default when nothing has been stored yet.
pub trait CounterStorePort {
    fn remaining_count(&self, default: u32) -> Result<u32, StorageError>;
    fn set_remaining_count(&mut self, count: u32) -> Result<(), StorageError>;

    fn interval_secs(&self, default: u32) -> Result<u32, StorageError>;
    fn set_interval_secs(&mut self, secs: u32) -> Result<(), StorageError>;

    fn battery_alert(&self) -> Result<bool, StorageError>;
    fn set_battery_alert(&mut self, low: bool) -> Result<(), StorageError>;
}

// ───────────────────────────────────────────────────────────────
// Platform port (driven adapter: domain ↔ GPIO / sleep / clock)
// ───────────────────────────────────────────────────────────────

/// Interrupt, sleep and clock services of the MCU.
pub trait PlatformPort {
    /// Attach `handler` to `pin` on the given edge.  The handler only ever
    /// touches `shared` through its atomic fields.
    fn register_edge_handler(
        &mut self,
        pin: i32,
        edge: Edge,
        handler: EdgeHandler,
        shared: &'static SharedState,
    ) -> Result<(), PlatformError>;

    /// Select the pin that may wake the MCU from any sleep depth.
    fn set_wake_pin(&mut self, pin: i32) -> Result<(), PlatformError>;

    /// Suspend until a selected wake source fires and report what woke us.
    ///
    /// On hardware a volatile request does not return: the MCU restarts
    /// from reset.  Simulation backends return and the loop re-runs its
    /// warm-wake path.
    fn enter_low_power_mode(&mut self, request: &SleepRequest) -> WakeCause;

    /// Seconds on a clock that keeps counting through every sleep depth.
    fn monotonic_secs(&self) -> u64;

    /// Current electrical level of an input pin (`true` = high).
    fn read_pin(&mut self, pin: i32) -> bool;

    /// What started this boot.  Anything other than
    /// [`WakeCause::PowerOn`] means the program restarted out of a volatile
    /// sleep and the saved session is valid.
    fn boot_wake_cause(&self) -> WakeCause;

    /// Drive the "awake" indicator output.
    fn set_awake_indicator(&mut self, on: bool);

    /// Keep `state` in memory that survives a volatile sleep but not a
    /// power cycle.
    fn retain(&mut self, state: RetainedState);

    /// What was last passed to [`retain`](Self::retain), if it survived.
    fn retained(&self) -> Option<RetainedState>;
}

/// Loop state that must outlive a volatile sleep but is not worth a flash
/// write on every wake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetainedState {
    /// Absolute time of the next report on the platform clock.
    pub report_deadline: Option<u64>,
    /// Level of the dispense input when the wake sources were armed.
    pub dispense_high: bool,
    /// A low-battery trip that no accepted uplink has carried yet.
    pub low_pending: bool,
}

// ───────────────────────────────────────────────────────────────
// Event sink port (driven adapter: domain → logging / telemetry)
// ───────────────────────────────────────────────────────────────

/// The loop emits structured [`AppEvent`](super::events::AppEvent)s
/// through this port.  Adapters decide where they go.
pub trait EventSink {
    fn emit(&mut self, event: &super::events::AppEvent);
}

// ───────────────────────────────────────────────────────────────
// Configuration port (driven adapter: domain ↔ persistent config)
// ───────────────────────────────────────────────────────────────

/// Loads and persists the device configuration.
///
/// Implementations MUST validate before persisting and reject invalid
/// values with [`ConfigError::ValidationFailed`] rather than clamping.
pub trait ConfigPort {
    /// Load configuration.  Returns [`DeviceConfig::default()`] if no
    /// stored config exists.
    fn load(&self) -> Result<DeviceConfig, ConfigError>;

    /// Validate and persist configuration.
    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

// ───────────────────────────────────────────────────────────────
// Storage port (driven adapter: domain ↔ NVS / flash)
// ───────────────────────────────────────────────────────────────

/// Persistent key-value storage.
///
/// - Keys are namespaced to prevent collisions between subsystems.
/// - Write operations MUST be atomic; no partial writes on power loss.
pub trait StoragePort {
    /// Read a value.  Returns the number of bytes written to `buf`.
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Write a value atomically.
    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a key.  Returns `Ok(())` even if the key didn't exist.
    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError>;

    /// Check whether a key exists without reading it.
    fn exists(&self, namespace: &str, key: &str) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Error types
// ───────────────────────────────────────────────────────────────

/// Errors from [`NetworkPort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkError {
    /// The network server rejected the join request.
    JoinDenied,
    /// An operation needs a session but none is established.
    NotJoined,
    /// The stack refused the request (duty cycle, busy, invalid parameter).
    Rejected,
    /// No response within the protocol timeout.
    Timeout,
    /// The stack answered with something we could not interpret.
    Protocol,
    /// Link to the modem failed.
    Io,
}

/// Errors from [`ConfigPort`] operations.
#[derive(Debug)]
pub enum ConfigError {
    /// No config found in storage (first boot).
    NotFound,
    /// Stored config failed deserialization.
    Corrupted,
    /// A config field failed range validation.
    ValidationFailed(&'static str),
    /// Underlying storage is full.
    StorageFull,
    /// Generic I/O error from the storage backend.
    IoError,
}

/// Errors from [`StoragePort`] and [`CounterStorePort`] operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    /// Requested key does not exist.
    NotFound,
    /// Storage partition is full.
    Full,
    /// Generic I/O error.
    IoError,
    /// Stored value has the wrong size or encoding.
    Corrupted,
}

/// Errors from [`PlatformPort`] setup calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformError {
    /// The pin number is not usable for the requested role.
    InvalidPin(i32),
    /// The vendor SDK returned an error code.
    Sdk(i32),
}

impl core::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::JoinDenied => write!(f, "join denied"),
            Self::NotJoined => write!(f, "not joined"),
            Self::Rejected => write!(f, "request rejected by stack"),
            Self::Timeout => write!(f, "timeout"),
            Self::Protocol => write!(f, "unexpected modem response"),
            Self::Io => write!(f, "modem I/O error"),
        }
    }
}

impl core::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "config not found"),
            Self::Corrupted => write!(f, "config corrupted"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {}", msg),
            Self::StorageFull => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl core::fmt::Display for StorageError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotFound => write!(f, "key not found"),
            Self::Full => write!(f, "storage full"),
            Self::IoError => write!(f, "I/O error"),
            Self::Corrupted => write!(f, "stored value corrupted"),
        }
    }
}

impl core::fmt::Display for PlatformError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::InvalidPin(pin) => write!(f, "invalid pin {}", pin),
            Self::Sdk(rc) => write!(f, "SDK error (rc={})", rc),
        }
    }
}

impl std::error::Error for NetworkError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for StorageError {}
impl std::error::Error for PlatformError {}
