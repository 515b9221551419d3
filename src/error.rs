//! Unified error taxonomy for the dispenser firmware.
//!
//! Every failure reported by an external collaborator is converted into
//! [`Error`] at the [`ControlLoop`](crate::app::service::ControlLoop)
//! boundary, turned into one log record, and the loop carries on with
//! best-effort state.  Nothing here ever halts the device.
//!
//! All variants are `Copy` so they can be passed into event sinks without
//! allocation.

use core::fmt;

use crate::app::ports::{NetworkError, PlatformError, StorageError};

// ---------------------------------------------------------------------------
// Top-level firmware error
// ---------------------------------------------------------------------------

/// Every fallible operation in the control loop funnels into this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A one-time setup call to the network layer or platform failed.
    /// The loop proceeds with prior/default settings.
    Configuration(&'static str),
    /// A network join attempt failed.  Retried on the next wake.
    Join(NetworkError),
    /// An uplink failed.  Counter state is unaffected; no retry this cycle.
    Transmit(NetworkError),
    /// Saving counters, configuration or the session failed.  The loop
    /// continues on volatile state.
    Persistence(&'static str),
}

impl Error {
    /// Short taxonomy tag used in log lines.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "ConfigurationError",
            Self::Join(_) => "JoinFailure",
            Self::Transmit(_) => "TransmitFailure",
            Self::Persistence(_) => "PersistenceFailure",
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(what) => write!(f, "configuration: {what} failed"),
            Self::Join(e) => write!(f, "join: {e}"),
            Self::Transmit(e) => write!(f, "transmit: {e}"),
            Self::Persistence(what) => write!(f, "persistence: {what} failed"),
        }
    }
}

impl std::error::Error for Error {}

impl From<StorageError> for Error {
    fn from(_: StorageError) -> Self {
        Self::Persistence("storage write")
    }
}

impl From<PlatformError> for Error {
    fn from(_: PlatformError) -> Self {
        Self::Configuration("platform setup")
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
