//! Device configuration parameters
//!
//! All tunable parameters for the dispenser node.  Stored in NVS as a
//! postcard blob and validated before every save.

use serde::{Deserialize, Serialize};

use crate::scheduler::{SleepDepth, WakeSource};

/// Core device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    // --- Counter ---
    /// Value the counter returns to on a manual reset (a full refill).
    pub full_count: u32,

    // --- Timing ---
    /// Reporting period used when the store has no interval yet (seconds)
    pub default_tx_interval_secs: u32,
    /// Upper bound on the reporting period, applied once at cold start
    pub tx_interval_ceiling_secs: u32,
    /// Shortest sleep ever requested, so an overrun never busy-wakes
    pub min_sleep_secs: u32,

    // --- Power ---
    /// Retained-memory or volatile sleep; fixed for the life of the build
    pub sleep_depth: SleepDepth,
    /// Wake sources armed before each sleep
    pub wake_source: WakeSource,

    // --- Radio ---
    /// Uplink data rate index (5 = SF7BW125 in EU868)
    pub data_rate: u8,
    /// Adaptive data rate
    pub adr: bool,
    /// LoRaWAN application port for reports
    pub app_port: u8,

    // --- Network credentials ---
    pub join_eui: [u8; 8],
    pub app_key: [u8; 16],
    pub frequency_sub_band: u8,
    pub public_network: bool,
    pub confirmed_uplinks: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            // Counter
            full_count: 1000,

            // Timing
            default_tx_interval_secs: 60,
            tx_interval_ceiling_secs: 60,
            min_sleep_secs: 1,

            // Power
            sleep_depth: SleepDepth::RetainMemory,
            wake_source: WakeSource::TimerOrInterrupt,

            // Radio
            data_rate: 5,
            adr: false,
            app_port: 1,

            // Network credentials
            join_eui: [0x70, 0xB3, 0xD5, 0x7E, 0xF0, 0x00, 0x3D, 0xAA],
            app_key: [
                0xF7, 0x7D, 0xDC, 0x41, 0xD3, 0x4D, 0xE5, 0xE5, 0x44, 0x3A, 0x83, 0x98, 0x2B, 0xE6,
                0xB2, 0xEA,
            ],
            frequency_sub_band: 0,
            public_network: true,
            confirmed_uplinks: false,
        }
    }
}
