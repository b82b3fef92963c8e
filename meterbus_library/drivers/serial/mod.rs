//! Serial port drivers
//!
//! This module provides the duplex byte stream the Modbus layer talks through.
//!
//! # Available Drivers
//!
//! - `SimulationSerialDriver` - Always available, replays scripted or simulated replies
//! - `SystemSerialDriver` - System serial port (requires `serial-hardware` feature)

mod simulation;

#[cfg(feature = "serial-hardware")]
mod system;

pub use simulation::{FrameResponder, SimulationSerialDriver};

#[cfg(feature = "serial-hardware")]
pub use system::SystemSerialDriver;

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::MeterbusResult;

/// Duplex byte stream capability
///
/// Everything the protocol layer needs from a transport. Reads never block:
/// `read_byte` returns `None` when nothing is buffered and the caller decides
/// how long to keep polling.
pub trait ByteStream {
    /// Queue bytes for transmission
    fn write_bytes(&mut self, data: &[u8]) -> MeterbusResult<()>;

    /// Block until every queued byte has left the transmitter
    fn flush(&mut self) -> MeterbusResult<()>;

    /// Number of received bytes ready to be read
    fn bytes_available(&mut self) -> MeterbusResult<usize>;

    /// Next received byte, if any
    fn read_byte(&mut self) -> MeterbusResult<Option<u8>>;

    /// Drop everything already received, returning how many bytes were dropped
    fn discard_input(&mut self) -> MeterbusResult<usize> {
        let mut dropped = 0;
        while self.bytes_available()? > 0 {
            if self.read_byte()?.is_none() {
                break;
            }
            dropped += 1;
        }
        Ok(dropped)
    }
}

impl<S: ByteStream + ?Sized> ByteStream for Box<S> {
    fn write_bytes(&mut self, data: &[u8]) -> MeterbusResult<()> {
        (**self).write_bytes(data)
    }

    fn flush(&mut self) -> MeterbusResult<()> {
        (**self).flush()
    }

    fn bytes_available(&mut self) -> MeterbusResult<usize> {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> MeterbusResult<Option<u8>> {
        (**self).read_byte()
    }

    fn discard_input(&mut self) -> MeterbusResult<usize> {
        (**self).discard_input()
    }
}

/// Serial port configuration
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity (None, Even, Odd)
    pub parity: SerialParity,
    /// Per-call read timeout in milliseconds
    pub timeout_ms: u64,
}

/// Serial parity
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SerialParity {
    #[default]
    None,
    Even,
    Odd,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            timeout_ms: 10,
        }
    }
}

impl SerialConfig {
    /// 8N1 at the given baud rate
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            ..Default::default()
        }
    }
}

/// Serial driver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum SerialDriverBackend {
    #[default]
    Simulation,
    #[cfg(feature = "serial-hardware")]
    System,
}

/// Type-erased serial driver
pub enum SerialDriver {
    Simulation(SimulationSerialDriver),
    #[cfg(feature = "serial-hardware")]
    System(SystemSerialDriver),
}

impl SerialDriver {
    pub fn new(backend: SerialDriverBackend, config: SerialConfig) -> MeterbusResult<Self> {
        match backend {
            SerialDriverBackend::Simulation => {
                Ok(Self::Simulation(SimulationSerialDriver::new(config)))
            }
            #[cfg(feature = "serial-hardware")]
            SerialDriverBackend::System => Ok(Self::System(SystemSerialDriver::new(config)?)),
        }
    }

    /// Simulation backend, when this driver is one
    pub fn as_simulation_mut(&mut self) -> Option<&mut SimulationSerialDriver> {
        match self {
            Self::Simulation(d) => Some(d),
            #[cfg(feature = "serial-hardware")]
            _ => None,
        }
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.init(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.init(),
        }
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.shutdown(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.shutdown(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Simulation(d) => d.is_available(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.is_available(),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.status(),
        }
    }
}

impl ByteStream for SerialDriver {
    fn write_bytes(&mut self, data: &[u8]) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.write_bytes(data),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.write_bytes(data),
        }
    }

    fn flush(&mut self) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => ByteStream::flush(d),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => ByteStream::flush(d),
        }
    }

    fn bytes_available(&mut self) -> MeterbusResult<usize> {
        match self {
            Self::Simulation(d) => d.bytes_available(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.bytes_available(),
        }
    }

    fn read_byte(&mut self) -> MeterbusResult<Option<u8>> {
        match self {
            Self::Simulation(d) => d.read_byte(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.read_byte(),
        }
    }

    fn discard_input(&mut self) -> MeterbusResult<usize> {
        match self {
            Self::Simulation(d) => d.discard_input(),
            #[cfg(feature = "serial-hardware")]
            Self::System(d) => d.discard_input(),
        }
    }
}
