//! Hardware initialisation and raw GPIO helpers.

pub mod hw_init;
