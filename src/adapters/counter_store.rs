//! Durable counter store over any [`StoragePort`].
//!
//! Each value is its own NVS key so a single commit only ever rewrites one
//! small entry:
//!
//! | key        | encoding     | meaning                       |
//! |------------|--------------|-------------------------------|
//! | `remaining`| u32 LE       | dispenses remaining           |
//! | `tx_intvl` | u32 LE       | report interval (seconds)     |
//! | `bat_alert`| u8 (0 / 1)   | battery alert state           |

use crate::app::ports::{CounterStorePort, StorageError, StoragePort};

use super::nvs::NAMESPACE;

const KEY_REMAINING: &str = "remaining";
const KEY_INTERVAL: &str = "tx_intvl";
const KEY_BATTERY: &str = "bat_alert";

/// [`CounterStorePort`] backed by a key/value store.
pub struct NvsCounterStore<S: StoragePort> {
    storage: S,
}

impl<S: StoragePort> NvsCounterStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Hand the backing store back (used by tests to inspect raw keys).
    pub fn into_inner(self) -> S {
        self.storage
    }

    fn read_u32(&self, key: &str, default: u32) -> Result<u32, StorageError> {
        let mut buf = [0u8; 4];
        match self.storage.read(NAMESPACE, key, &mut buf) {
            Ok(4) => Ok(u32::from_le_bytes(buf)),
            Ok(_) => Err(StorageError::Corrupted),
            Err(StorageError::NotFound) => Ok(default),
            Err(e) => Err(e),
        }
    }

    fn write_u32(&mut self, key: &str, value: u32) -> Result<(), StorageError> {
        self.storage.write(NAMESPACE, key, &value.to_le_bytes())
    }
}

impl<S: StoragePort> CounterStorePort for NvsCounterStore<S> {
    fn remaining_count(&self, default: u32) -> Result<u32, StorageError> {
        self.read_u32(KEY_REMAINING, default)
    }

    fn set_remaining_count(&mut self, count: u32) -> Result<(), StorageError> {
        self.write_u32(KEY_REMAINING, count)
    }

    fn interval_secs(&self, default: u32) -> Result<u32, StorageError> {
        self.read_u32(KEY_INTERVAL, default)
    }

    fn set_interval_secs(&mut self, secs: u32) -> Result<(), StorageError> {
        self.write_u32(KEY_INTERVAL, secs)
    }

    fn battery_alert(&self) -> Result<bool, StorageError> {
        let mut buf = [0u8; 1];
        match self.storage.read(NAMESPACE, KEY_BATTERY, &mut buf) {
            Ok(1) => match buf[0] {
                0 => Ok(false),
                1 => Ok(true),
                _ => Err(StorageError::Corrupted),
            },
            Ok(_) => Err(StorageError::Corrupted),
            Err(StorageError::NotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn set_battery_alert(&mut self, low: bool) -> Result<(), StorageError> {
        self.storage.write(NAMESPACE, KEY_BATTERY, &[u8::from(low)])
    }
}
