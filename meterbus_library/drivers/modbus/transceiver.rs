//! Half-duplex direction control

use std::thread;
use std::time::Duration;

use tracing::trace;

use meterbus_core::error::MeterbusResult;

use crate::drivers::digital_io::DigitalIoDriver;

/// Which way the transceiver is pointed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Transmit,
    Receive,
}

/// GPIO wired to the DE/RE pins of the transceiver
pub struct DirectionLine {
    pub driver: DigitalIoDriver,
    pub pin: u64,
}

impl DirectionLine {
    pub fn new(driver: DigitalIoDriver, pin: u64) -> Self {
        Self { driver, pin }
    }
}

/// Two-state director for the transceiver
///
/// Without a direction line both transitions are no-ops and no settle delay is
/// spent, which suits auto-direction adapters and full-duplex links.
pub struct TransceiverDirector {
    line: Option<DirectionLine>,
    settle: Duration,
    state: Direction,
}

impl TransceiverDirector {
    /// Director for an auto-direction transport
    pub fn automatic() -> Self {
        Self {
            line: None,
            settle: Duration::ZERO,
            state: Direction::Receive,
        }
    }

    /// Director driving `line`, high for transmit and low for receive
    pub fn with_line(line: DirectionLine, settle: Duration) -> Self {
        Self {
            line: Some(line),
            settle,
            state: Direction::Receive,
        }
    }

    pub fn state(&self) -> Direction {
        self.state
    }

    pub fn has_line(&self) -> bool {
        self.line.is_some()
    }

    pub fn line(&self) -> Option<&DirectionLine> {
        self.line.as_ref()
    }

    /// Bring up the direction line and park it in receive
    pub fn init(&mut self) -> MeterbusResult<()> {
        if let Some(line) = self.line.as_mut() {
            line.driver.init()?;
        }
        self.set_receive()
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        if let Some(line) = self.line.as_mut() {
            line.driver.shutdown()?;
        }
        self.state = Direction::Receive;
        Ok(())
    }

    pub fn set_transmit(&mut self) -> MeterbusResult<()> {
        self.drive(Direction::Transmit)
    }

    pub fn set_receive(&mut self) -> MeterbusResult<()> {
        self.drive(Direction::Receive)
    }

    fn drive(&mut self, direction: Direction) -> MeterbusResult<()> {
        if let Some(line) = self.line.as_mut() {
            line.driver
                .write_pin(line.pin, direction == Direction::Transmit)?;
            trace!(pin = line.pin, ?direction, "direction line");
            if !self.settle.is_zero() {
                thread::sleep(self.settle);
            }
        }
        self.state = direction;
        Ok(())
    }
}
