//! Digital I/O drivers
//!
//! Output lines used to steer half-duplex transceivers (the DE/RE pin of a
//! MAX485 style chip).
//!
//! # Available Drivers
//!
//! - `SimulationDigitalIoDriver` - Always available, records every level change
//! - `GpioDigitalIoDriver` - Linux sysfs GPIO (requires `gpio-hardware` feature)

mod simulation;

#[cfg(feature = "gpio-hardware")]
mod gpio;

pub use simulation::SimulationDigitalIoDriver;

#[cfg(feature = "gpio-hardware")]
pub use gpio::GpioDigitalIoDriver;

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::MeterbusResult;

/// Output pin configuration
#[derive(Debug, Clone, Default)]
pub struct DigitalIoPin {
    /// GPIO pin number
    pub pin: u64,
    /// Level driven right after init, for outputs
    pub initial_value: bool,
    /// Logical high drives the physical line low
    pub inverted: bool,
}

/// Digital I/O configuration
#[derive(Debug, Clone, Default)]
pub struct DigitalIoConfig {
    pub pins: Vec<DigitalIoPin>,
}

impl DigitalIoConfig {
    pub fn new() -> Self {
        Self { pins: Vec::new() }
    }

    pub fn add_output(mut self, pin: u64, initial: bool) -> Self {
        self.pins.push(DigitalIoPin {
            pin,
            initial_value: initial,
            inverted: false,
        });
        self
    }

    /// Output whose physical level is the opposite of the logical one
    pub fn add_inverted_output(mut self, pin: u64, initial: bool) -> Self {
        self.pins.push(DigitalIoPin {
            pin,
            initial_value: initial,
            inverted: true,
        });
        self
    }

    /// Whether `pin` is configured, and if so whether it is inverted
    fn inversion(&self, pin: u64) -> Option<bool> {
        self.pins.iter().find(|p| p.pin == pin).map(|p| p.inverted)
    }
}

/// Digital I/O driver backend selection
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DigitalIoDriverBackend {
    #[default]
    Simulation,
    #[cfg(feature = "gpio-hardware")]
    Gpio,
}

/// Type-erased digital I/O driver
pub enum DigitalIoDriver {
    Simulation(SimulationDigitalIoDriver),
    #[cfg(feature = "gpio-hardware")]
    Gpio(GpioDigitalIoDriver),
}

impl DigitalIoDriver {
    pub fn new(backend: DigitalIoDriverBackend, config: DigitalIoConfig) -> MeterbusResult<Self> {
        match backend {
            DigitalIoDriverBackend::Simulation => {
                Ok(Self::Simulation(SimulationDigitalIoDriver::new(config)))
            }
            #[cfg(feature = "gpio-hardware")]
            DigitalIoDriverBackend::Gpio => Ok(Self::Gpio(GpioDigitalIoDriver::new(config)?)),
        }
    }

    /// Simulation backend, when this driver is one
    pub fn as_simulation(&self) -> Option<&SimulationDigitalIoDriver> {
        match self {
            Self::Simulation(d) => Some(d),
            #[cfg(feature = "gpio-hardware")]
            _ => None,
        }
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.init(),
            #[cfg(feature = "gpio-hardware")]
            Self::Gpio(d) => d.init(),
        }
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.shutdown(),
            #[cfg(feature = "gpio-hardware")]
            Self::Gpio(d) => d.shutdown(),
        }
    }

    pub fn is_available(&self) -> bool {
        match self {
            Self::Simulation(d) => d.is_available(),
            #[cfg(feature = "gpio-hardware")]
            Self::Gpio(d) => d.is_available(),
        }
    }

    pub fn status(&self) -> DriverStatus {
        match self {
            Self::Simulation(d) => d.status(),
            #[cfg(feature = "gpio-hardware")]
            Self::Gpio(d) => d.status(),
        }
    }

    // ========================================================================
    // Digital I/O methods
    // ========================================================================

    /// Drive an output pin to a logical level
    pub fn write_pin(&mut self, pin: u64, value: bool) -> MeterbusResult<()> {
        match self {
            Self::Simulation(d) => d.write_pin(pin, value),
            #[cfg(feature = "gpio-hardware")]
            Self::Gpio(d) => d.write_pin(pin, value),
        }
    }
}
