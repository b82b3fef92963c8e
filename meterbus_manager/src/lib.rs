//! meterbus manager library
//!
//! Command implementations behind the `meterbus` binary. Each command takes
//! an already loaded [`BusConfig`](meterbus_core::BusConfig) so it can be
//! driven from tests against simulated meters.

pub mod commands;
