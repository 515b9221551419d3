//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter         | Implements         | Connects to                 |
//! |-----------------|--------------------|-----------------------------|
//! | `counter_store` | CounterStorePort   | any StoragePort (NVS)       |
//! | `lora_modem`    | NetworkPort        | LoRaWAN AT modem over UART  |
//! | `log_sink`      | EventSink          | Serial log output           |
//! | `nvs`           | ConfigPort         | NVS / in-memory store       |
//! |                 | StoragePort        |                             |
//! | `platform`      | PlatformPort       | ESP32 GPIO, sleep, RTC      |
//! | `time`          | (used by platform) | RTC clock                   |
//! | `device_id`     | (used by main)     | eFuse MAC → DevEUI          |

pub mod counter_store;
pub mod device_id;
pub mod log_sink;
pub mod lora_modem;
pub mod nvs;
pub mod platform;
pub mod time;
