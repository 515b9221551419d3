//! Device identity derived from the ESP32 factory MAC address.
//!
//! The LoRaWAN DevEUI is the EUI-64 expansion of the 6-byte MAC
//! (`FF:FE` inserted after the OUI), so every board joins with a stable,
//! unique identity without a provisioning step.  A short label of the
//! form `DN-XXYYZZ` is used in log lines.

/// Fixed-size label string: "DN-XXYYZZ".
pub type DeviceLabel = heapless::String<16>;

/// Full 6-byte MAC address.
pub type MacAddress = [u8; 6];

/// 8-byte LoRaWAN device EUI.
pub type DevEui = [u8; 8];

/// Read the factory MAC address from eFuse.
#[cfg(target_os = "espidf")]
pub fn read_mac() -> MacAddress {
    let mut mac: MacAddress = [0u8; 6];
    // SAFETY: the buffer is exactly the 6 bytes the call writes.
    unsafe {
        esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr());
    }
    mac
}

/// Simulation: returns a deterministic fake MAC.
#[cfg(not(target_os = "espidf"))]
pub fn read_mac() -> MacAddress {
    [0xDE, 0xAD, 0xBE, 0xEF, 0xCA, 0xFE]
}

/// EUI-64 from EUI-48: `AA:BB:CC:DD:EE:FF` becomes
/// `AA:BB:CC:FF:FE:DD:EE:FF`.
pub fn dev_eui(mac: &MacAddress) -> DevEui {
    [mac[0], mac[1], mac[2], 0xFF, 0xFE, mac[3], mac[4], mac[5]]
}

/// Short log label from the last 3 MAC bytes, e.g. `DN-EFCAFE`.
pub fn device_label(mac: &MacAddress) -> DeviceLabel {
    let mut id = DeviceLabel::new();
    use core::fmt::Write;
    let _ = write!(id, "DN-{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5]);
    id
}
