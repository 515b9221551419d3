//! Application core: domain logic behind port traits.
//!
//! This module contains the rules of the dispenser node: the wake/report/
//! sleep cycle, counter persistence, battery notification and network
//! provisioning.  All interaction with hardware happens through **port
//! traits** defined in [`ports`], keeping this layer fully testable
//! without real peripherals.

pub mod events;
pub mod ports;
pub mod service;
