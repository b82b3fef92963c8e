//! System serial port driver using serialport crate

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};
use tracing::debug;

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::{MeterbusError, MeterbusResult};

use super::{ByteStream, SerialConfig, SerialParity};

/// System serial port driver
///
/// UART behind a USB-RS485 dongle or an on-board serial line. Reads are
/// short-timeout polls so the Modbus reader keeps control of framing.
pub struct SystemSerialDriver {
    config: SerialConfig,
    status: DriverStatus,
    port: Option<Box<dyn SerialPort>>,
}

impl SystemSerialDriver {
    pub fn new(config: SerialConfig) -> MeterbusResult<Self> {
        Ok(Self {
            config,
            status: DriverStatus::Uninitialized,
            port: None,
        })
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        let data_bits = match self.config.data_bits {
            5 => serialport::DataBits::Five,
            6 => serialport::DataBits::Six,
            7 => serialport::DataBits::Seven,
            _ => serialport::DataBits::Eight,
        };

        let stop_bits = match self.config.stop_bits {
            2 => serialport::StopBits::Two,
            _ => serialport::StopBits::One,
        };

        let parity = match self.config.parity {
            SerialParity::None => serialport::Parity::None,
            SerialParity::Even => serialport::Parity::Even,
            SerialParity::Odd => serialport::Parity::Odd,
        };

        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(self.config.timeout_ms))
            .open()
            .map_err(|e| {
                self.status = DriverStatus::Error(e.to_string());
                MeterbusError::driver(format!(
                    "Failed to open serial port {}: {}",
                    self.config.port, e
                ))
            })?;

        debug!(port = %self.config.port, baud = self.config.baud_rate, "serial port opened");
        self.port = Some(port);
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        self.port = None;
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        serialport::available_ports()
            .map(|ports| ports.iter().any(|p| p.port_name == self.config.port))
            .unwrap_or(false)
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    fn port_mut(&mut self) -> MeterbusResult<&mut Box<dyn SerialPort>> {
        if !self.status.is_operational() {
            return Err(MeterbusError::driver("Driver not initialized"));
        }
        self.status = DriverStatus::Running;
        self.port
            .as_mut()
            .ok_or_else(|| MeterbusError::driver("Serial port not opened"))
    }
}

impl ByteStream for SystemSerialDriver {
    fn write_bytes(&mut self, data: &[u8]) -> MeterbusResult<()> {
        self.port_mut()?
            .write_all(data)
            .map_err(|e| MeterbusError::driver(format!("Write failed: {}", e)))
    }

    fn flush(&mut self) -> MeterbusResult<()> {
        self.port_mut()?
            .flush()
            .map_err(|e| MeterbusError::driver(format!("Flush failed: {}", e)))
    }

    fn bytes_available(&mut self) -> MeterbusResult<usize> {
        let pending = self
            .port_mut()?
            .bytes_to_read()
            .map_err(|e| MeterbusError::driver(format!("Query failed: {}", e)))?;
        Ok(pending as usize)
    }

    fn read_byte(&mut self) -> MeterbusResult<Option<u8>> {
        let mut buffer = [0u8; 1];
        match self.port_mut()?.read(&mut buffer) {
            Ok(1) => Ok(Some(buffer[0])),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(MeterbusError::driver(format!("Read failed: {}", e))),
        }
    }

    fn discard_input(&mut self) -> MeterbusResult<usize> {
        let dropped = self.bytes_available()?;
        self.port_mut()?
            .clear(ClearBuffer::Input)
            .map_err(|e| MeterbusError::driver(format!("Clear failed: {}", e)))?;
        Ok(dropped)
    }
}
