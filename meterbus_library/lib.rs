//! # meterbus library
//!
//! Modbus-RTU polling of energy meters on an RS-485 bus.
//!
//! ## Structure
//!
//! ```text
//! meterbus_library/
//! ── drivers/
//!    ── serial/      # ByteStream capability, simulation and system ports
//!    ── digital_io/  # Direction-control GPIO
//!    ── modbus/      # CRC, frames, reader, validator, RtuSession
//! ── devices/        # Register-profile meters and built-in profiles
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use meterbus_library::{BusConfig, Meter};
//!
//! let config = BusConfig::find_and_load()?;
//! let mut meter = Meter::open("mains", &config)?;
//! let readings = meter.read_all();
//! println!("{} V", readings.get("voltage"));
//! ```

pub mod devices;
pub mod drivers;

pub use meterbus_core::{
    BusConfig, ByteOrder, DriverStatus, ExceptionCode, FieldLayout, MeterConfig, MeterbusError,
    MeterbusResult, QuantitySpec, RegisterProfile, RegisterSpace, ResetStyle, SettingSpec,
    TimeoutKind, GENERAL_ADDRESS,
};

pub use devices::{decode_quantity, profiles, Meter, Reading, Readings, INVALID_ADDRESS};

pub use drivers::modbus::{
    compose, RtuSession, SessionConfig, SessionStats, SimulatedSlave, TransactionState,
    TransceiverDirector,
};
pub use drivers::serial::{
    ByteStream, FrameResponder, SerialConfig, SerialDriver, SerialDriverBackend,
    SimulationSerialDriver,
};

#[cfg(feature = "serial-hardware")]
pub use drivers::serial::SystemSerialDriver;

pub use drivers::digital_io::{DigitalIoDriver, SimulationDigitalIoDriver};

#[cfg(feature = "gpio-hardware")]
pub use drivers::digital_io::GpioDigitalIoDriver;
