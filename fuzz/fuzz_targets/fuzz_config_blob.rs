//! Fuzz target: stored configuration blob
//!
//! A corrupted NVS entry must decode to an error or to a config that
//! validation either accepts or rejects; never a panic.  Anything that
//! validates must re-encode.
//!
//! cargo fuzz run fuzz_config_blob

#![no_main]

use dispenser::adapters::nvs::validate_config;
use dispenser::config::DeviceConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(cfg) = postcard::from_bytes::<DeviceConfig>(data) else {
        return;
    };
    if validate_config(&cfg).is_ok() {
        assert!(cfg.full_count <= u32::from(u16::MAX));
        let _ = postcard::to_allocvec(&cfg).expect("valid config re-encodes");
    }
});
