//! Hardware drivers
//!
//! Each driver family offers a simulation backend that is always compiled and
//! a hardware backend behind a cargo feature.

pub mod digital_io;
pub mod modbus;
pub mod serial;

pub use digital_io::{DigitalIoConfig, DigitalIoDriver, DigitalIoDriverBackend};
pub use modbus::{RtuSession, SessionConfig, SimulatedSlave, TransceiverDirector};
pub use serial::{ByteStream, SerialConfig, SerialDriver, SerialDriverBackend};
