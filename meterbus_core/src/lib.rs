//! # meterbus core
//!
//! Shared building blocks for polling energy meters over Modbus-RTU:
//!
//! - **Errors**: one taxonomy for transport, protocol and configuration failures
//! - **Drivers**: lifecycle status shared by serial ports and GPIO lines
//! - **Profiles**: per-model register maps, scale factors and byte order
//! - **Config**: YAML/TOML description of the meters on a bus

pub mod config;
pub mod driver;
pub mod error;
pub mod profile;

pub use config::{BusConfig, MeterConfig, GENERAL_ADDRESS};
pub use driver::DriverStatus;
pub use error::{ExceptionCode, MeterbusError, MeterbusResult, TimeoutKind};
pub use profile::{
    ByteOrder, FieldLayout, QuantitySpec, RegisterProfile, RegisterSpace, ResetStyle, SettingSpec,
};
