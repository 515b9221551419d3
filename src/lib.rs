//! Dispenser node firmware library.
//!
//! Exposes the control loop, its ports and the pure-logic modules for
//! integration testing.  All ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module and falls back to a
//! simulation backend on the host.

#![deny(unused_must_use)]

pub mod app;
pub mod battery;
pub mod config;
pub mod events;
pub mod fsm;
pub mod payload;
pub mod pins;
pub mod power;
pub mod scheduler;

pub mod error;

// Hardware-facing modules; the simulation backends keep them buildable
// and testable off-target.
pub mod adapters;
pub mod drivers;
