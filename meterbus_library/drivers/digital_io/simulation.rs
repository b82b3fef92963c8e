//! Simulation Digital I/O driver

use std::collections::HashMap;

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::{MeterbusError, MeterbusResult};

use super::DigitalIoConfig;

/// Simulation digital I/O driver
///
/// Keeps pin levels in memory and logs every output write, so tests can
/// check the exact sequence a transceiver line went through.
pub struct SimulationDigitalIoDriver {
    config: DigitalIoConfig,
    status: DriverStatus,
    /// Physical pin levels
    pin_values: HashMap<u64, bool>,
    /// (pin, logical level) for every successful write, oldest first
    history: Vec<(u64, bool)>,
}

impl SimulationDigitalIoDriver {
    pub fn new(config: DigitalIoConfig) -> Self {
        Self {
            config,
            status: DriverStatus::Uninitialized,
            pin_values: HashMap::new(),
            history: Vec::new(),
        }
    }

    /// Physical level of a pin
    pub fn get_value(&self, pin: u64) -> Option<bool> {
        self.pin_values.get(&pin).copied()
    }

    /// Every logical level written so far
    pub fn history(&self) -> &[(u64, bool)] {
        &self.history
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        for pin_config in &self.config.pins {
            let level = pin_config.initial_value != pin_config.inverted;
            self.pin_values.insert(pin_config.pin, level);
        }
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        // Release every output to its logical low level
        for pin_config in &self.config.pins {
            self.pin_values.insert(pin_config.pin, pin_config.inverted);
        }
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        true
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    // ========================================================================
    // Digital I/O methods
    // ========================================================================

    pub fn write_pin(&mut self, pin: u64, value: bool) -> MeterbusResult<()> {
        if !self.status.is_operational() {
            return Err(MeterbusError::driver("Driver not initialized"));
        }
        let inverted = self.config.inversion(pin).ok_or_else(|| {
            MeterbusError::driver(format!("Pin {} is not configured as output", pin))
        })?;

        self.status = DriverStatus::Running;
        self.pin_values.insert(pin, value != inverted);
        self.history.push((pin, value));
        Ok(())
    }
}

impl Default for SimulationDigitalIoDriver {
    fn default() -> Self {
        Self::new(DigitalIoConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_records_history() {
        let mut driver = SimulationDigitalIoDriver::new(DigitalIoConfig::new().add_output(17, false));
        assert!(driver.write_pin(17, true).is_err());

        driver.init().unwrap();
        driver.write_pin(17, true).unwrap();
        driver.write_pin(17, false).unwrap();

        assert_eq!(driver.history(), &[(17, true), (17, false)]);
        assert_eq!(driver.get_value(17), Some(false));

        driver.clear_history();
        assert!(driver.history().is_empty());
    }

    #[test]
    fn test_unconfigured_pin_rejects_writes() {
        let mut driver = SimulationDigitalIoDriver::new(DigitalIoConfig::new().add_output(17, false));
        driver.init().unwrap();
        assert!(driver.write_pin(4, true).is_err());
        assert!(driver.history().is_empty());
        assert_eq!(driver.get_value(4), None);
    }

    #[test]
    fn test_inverted_output() {
        let config = DigitalIoConfig::new().add_inverted_output(22, false);
        let mut driver = SimulationDigitalIoDriver::new(config);
        driver.init().unwrap();
        assert_eq!(driver.get_value(22), Some(true));

        driver.write_pin(22, true).unwrap();
        assert_eq!(driver.get_value(22), Some(false));
        assert_eq!(driver.history(), &[(22, true)]);

        driver.shutdown().unwrap();
        assert_eq!(driver.get_value(22), Some(true));
    }
}
