//! NVS (Non-Volatile Storage) adapter.
//!
//! Implements both [`ConfigPort`] and [`StoragePort`] for the dispenser
//! node.  The config blob and the counter keys of
//! [`NvsCounterStore`](super::counter_store::NvsCounterStore) share one
//! namespace; every write is followed by `nvs_commit()`, so each key is
//! replaced atomically.
//!
//! Off-target the adapter keeps everything in a `HashMap`, which is what the
//! host tests run against.

use crate::app::ports::{ConfigError, ConfigPort, StorageError, StoragePort};
use crate::config::DeviceConfig;
use log::{debug, info};

#[cfg(target_os = "espidf")]
use log::warn;

#[cfg(not(target_os = "espidf"))]
use std::{cell::RefCell, collections::HashMap};

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

/// Namespace shared by the config blob and the counter store.
pub const NAMESPACE: &str = "dispenser";
const CONFIG_KEY: &str = "devcfg";

#[cfg_attr(not(target_os = "espidf"), allow(dead_code))]
const MAX_BLOB_SIZE: usize = 512;

/// ESP-IDF status code.
#[cfg(target_os = "espidf")]
type EspCode = i32;

pub struct NvsAdapter {
    /// `namespace/key` to value.
    #[cfg(not(target_os = "espidf"))]
    sim: RefCell<HashMap<String, Vec<u8>>>,
}

impl NvsAdapter {
    /// Bring up the NVS partition.
    ///
    /// A partition that is full or was written by a newer IDF is erased and
    /// initialised again.  That loses the counter, which then restarts at
    /// the configured full value.
    pub fn new() -> Result<Self, ConfigError> {
        #[cfg(target_os = "espidf")]
        {
            // SAFETY: called once from the main task before any other NVS
            // access.
            let mut ret = unsafe { nvs_flash_init() };
            if ret == ESP_ERR_NVS_NO_FREE_PAGES || ret == ESP_ERR_NVS_NEW_VERSION_FOUND {
                warn!("nvs: partition unusable ({}), erasing", ret);
                // SAFETY: as above.
                ret = unsafe { nvs_flash_erase() };
                if ret == ESP_OK {
                    // SAFETY: as above.
                    ret = unsafe { nvs_flash_init() };
                }
            }
            if ret != ESP_OK {
                return Err(ConfigError::IoError);
            }
            info!("nvs: partition ready");
        }

        #[cfg(not(target_os = "espidf"))]
        info!("nvs: in-memory backend");

        Ok(Self {
            #[cfg(not(target_os = "espidf"))]
            sim: RefCell::new(HashMap::new()),
        })
    }

    #[cfg(not(target_os = "espidf"))]
    fn sim_key(namespace: &str, key: &str) -> String {
        format!("{namespace}/{key}")
    }

    /// NUL-terminated copy of an NVS name (max 15 chars).
    #[cfg(target_os = "espidf")]
    fn c_name(name: &str) -> [u8; 16] {
        let mut buf = [0u8; 16];
        let bytes = name.as_bytes();
        let len = bytes.len().min(15);
        buf[..len].copy_from_slice(&bytes[..len]);
        buf
    }

    /// Run `f` on an open handle for `namespace`; the handle is closed on
    /// every path.
    #[cfg(target_os = "espidf")]
    fn with_handle<T>(
        namespace: &str,
        mode: nvs_open_mode_t,
        f: impl FnOnce(nvs_handle_t) -> Result<T, EspCode>,
    ) -> Result<T, EspCode> {
        let ns = Self::c_name(namespace);
        let mut handle: nvs_handle_t = 0;
        // SAFETY: `ns` is NUL-terminated and outlives the call.
        let ret = unsafe { nvs_open(ns.as_ptr().cast(), mode, &mut handle) };
        if ret != ESP_OK {
            return Err(ret);
        }
        let result = f(handle);
        // SAFETY: opened above, not used afterwards.
        unsafe { nvs_close(handle) };
        result
    }

    /// Copy the blob under `key` into `buf`, returning its length.  A null
    /// `buf` only queries the length.
    #[cfg(target_os = "espidf")]
    fn get_blob(namespace: &str, key: &str, buf: Option<&mut [u8]>) -> Result<usize, EspCode> {
        let name = Self::c_name(key);
        Self::with_handle(namespace, nvs_open_mode_t_NVS_READONLY, |handle| {
            let (ptr, mut size) = match buf {
                Some(b) => (b.as_mut_ptr().cast(), b.len()),
                None => (core::ptr::null_mut(), 0),
            };
            // SAFETY: `size` bounds the write through `ptr`; a null `ptr`
            // makes NVS report the stored length only.
            let ret = unsafe { nvs_get_blob(handle, name.as_ptr().cast(), ptr, &mut size) };
            if ret == ESP_OK { Ok(size) } else { Err(ret) }
        })
    }

    /// Store `data` under `key` and commit.
    #[cfg(target_os = "espidf")]
    fn set_blob(namespace: &str, key: &str, data: &[u8]) -> Result<(), EspCode> {
        let name = Self::c_name(key);
        Self::with_handle(namespace, nvs_open_mode_t_NVS_READWRITE, |handle| {
            // SAFETY: key and data buffers outlive the call.
            let ret = unsafe {
                nvs_set_blob(handle, name.as_ptr().cast(), data.as_ptr().cast(), data.len())
            };
            if ret != ESP_OK {
                return Err(ret);
            }
            // SAFETY: handle is open read-write.
            let ret = unsafe { nvs_commit(handle) };
            if ret == ESP_OK { Ok(()) } else { Err(ret) }
        })
    }

    /// The whole config blob, sized from NVS first.
    #[cfg(target_os = "espidf")]
    fn read_config_blob() -> Result<Vec<u8>, EspCode> {
        let size = Self::get_blob(NAMESPACE, CONFIG_KEY, None)?;
        if size == 0 || size > MAX_BLOB_SIZE {
            return Err(ESP_ERR_NVS_INVALID_LENGTH);
        }
        let mut buf = vec![0u8; size];
        let n = Self::get_blob(NAMESPACE, CONFIG_KEY, Some(&mut buf))?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// Range-check a configuration before it is persisted.
pub fn validate_config(cfg: &DeviceConfig) -> Result<(), ConfigError> {
    if !(1..=u32::from(u16::MAX)).contains(&cfg.full_count) {
        return Err(ConfigError::ValidationFailed(
            "full_count must be 1-65535 to fit the report",
        ));
    }
    if cfg.min_sleep_secs == 0 {
        return Err(ConfigError::ValidationFailed("min_sleep_secs must be >= 1"));
    }
    if cfg.tx_interval_ceiling_secs < cfg.min_sleep_secs {
        return Err(ConfigError::ValidationFailed(
            "tx_interval_ceiling_secs must be >= min_sleep_secs",
        ));
    }
    if !(cfg.min_sleep_secs..=cfg.tx_interval_ceiling_secs).contains(&cfg.default_tx_interval_secs)
    {
        return Err(ConfigError::ValidationFailed(
            "default_tx_interval_secs must lie between min_sleep_secs and the ceiling",
        ));
    }
    if cfg.data_rate > 15 {
        return Err(ConfigError::ValidationFailed("data_rate must be 0-15"));
    }
    if !(1..=223).contains(&cfg.app_port) {
        return Err(ConfigError::ValidationFailed("app_port must be 1-223"));
    }
    if cfg.frequency_sub_band > 8 {
        return Err(ConfigError::ValidationFailed(
            "frequency_sub_band must be 0-8",
        ));
    }
    Ok(())
}

impl ConfigPort for NvsAdapter {
    fn load(&self) -> Result<DeviceConfig, ConfigError> {
        #[cfg(not(target_os = "espidf"))]
        let stored = self
            .sim
            .borrow()
            .get(&Self::sim_key(NAMESPACE, CONFIG_KEY))
            .cloned();

        #[cfg(target_os = "espidf")]
        let stored = match Self::read_config_blob() {
            Ok(bytes) => Some(bytes),
            Err(e) if e == ESP_ERR_NVS_NOT_FOUND => None,
            Err(e) => {
                warn!("nvs: config read failed ({}), using defaults", e);
                None
            }
        };

        match stored {
            Some(bytes) => {
                let cfg: DeviceConfig =
                    postcard::from_bytes(&bytes).map_err(|_| ConfigError::Corrupted)?;
                info!("nvs: config loaded ({} bytes)", bytes.len());
                Ok(cfg)
            }
            None => {
                info!("nvs: no stored config, using defaults");
                Ok(DeviceConfig::default())
            }
        }
    }

    fn save(&self, config: &DeviceConfig) -> Result<(), ConfigError> {
        validate_config(config)?;
        let bytes = postcard::to_allocvec(config).map_err(|_| ConfigError::IoError)?;

        #[cfg(not(target_os = "espidf"))]
        self.sim
            .borrow_mut()
            .insert(Self::sim_key(NAMESPACE, CONFIG_KEY), bytes.clone());

        #[cfg(target_os = "espidf")]
        Self::set_blob(NAMESPACE, CONFIG_KEY, &bytes).map_err(|e| {
            warn!("nvs: config write failed ({})", e);
            if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                ConfigError::StorageFull
            } else {
                ConfigError::IoError
            }
        })?;

        info!("nvs: config saved ({} bytes)", bytes.len());
        Ok(())
    }
}

impl StoragePort for NvsAdapter {
    fn read(&self, namespace: &str, key: &str, buf: &mut [u8]) -> Result<usize, StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            let map = self.sim.borrow();
            let data = map
                .get(&Self::sim_key(namespace, key))
                .ok_or(StorageError::NotFound)?;
            let len = data.len().min(buf.len());
            buf[..len].copy_from_slice(&data[..len]);
            Ok(len)
        }

        #[cfg(target_os = "espidf")]
        {
            Self::get_blob(namespace, key, Some(buf)).map_err(|e| match e {
                e if e == ESP_ERR_NVS_NOT_FOUND => StorageError::NotFound,
                e if e == ESP_ERR_NVS_INVALID_LENGTH => StorageError::Corrupted,
                _ => StorageError::IoError,
            })
        }
    }

    fn write(&mut self, namespace: &str, key: &str, data: &[u8]) -> Result<(), StorageError> {
        debug!("nvs: {}/{} <- {} bytes", namespace, key, data.len());

        #[cfg(not(target_os = "espidf"))]
        {
            self.sim
                .borrow_mut()
                .insert(Self::sim_key(namespace, key), data.to_vec());
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            Self::set_blob(namespace, key, data).map_err(|e| {
                if e == ESP_ERR_NVS_NOT_ENOUGH_SPACE {
                    StorageError::Full
                } else {
                    StorageError::IoError
                }
            })
        }
    }

    fn delete(&mut self, namespace: &str, key: &str) -> Result<(), StorageError> {
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.borrow_mut().remove(&Self::sim_key(namespace, key));
            Ok(())
        }

        #[cfg(target_os = "espidf")]
        {
            let name = Self::c_name(key);
            Self::with_handle(namespace, nvs_open_mode_t_NVS_READWRITE, |handle| {
                // SAFETY: `name` is NUL-terminated.
                let ret = unsafe { nvs_erase_key(handle, name.as_ptr().cast()) };
                if ret != ESP_OK && ret != ESP_ERR_NVS_NOT_FOUND {
                    return Err(ret);
                }
                // SAFETY: handle is open read-write.
                let ret = unsafe { nvs_commit(handle) };
                if ret == ESP_OK { Ok(()) } else { Err(ret) }
            })
            .map_err(|_| StorageError::IoError)
        }
    }

    fn exists(&self, namespace: &str, key: &str) -> bool {
        #[cfg(not(target_os = "espidf"))]
        {
            self.sim.borrow().contains_key(&Self::sim_key(namespace, key))
        }

        #[cfg(target_os = "espidf")]
        {
            let name = Self::c_name(key);
            Self::with_handle(namespace, nvs_open_mode_t_NVS_READONLY, |handle| {
                // SAFETY: `name` is NUL-terminated; the type out-pointer may
                // be null.
                let ret = unsafe { nvs_find_key(handle, name.as_ptr().cast(), core::ptr::null_mut()) };
                Ok(ret == ESP_OK)
            })
            .is_ok_and(|found| found)
        }
    }
}
