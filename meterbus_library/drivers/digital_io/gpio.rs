//! GPIO-based Digital I/O driver
//!
//! Uses Linux sysfs GPIO interface.

use std::collections::HashMap;
use std::thread;
use std::time::Duration;

use sysfs_gpio::{Direction, Pin};
use tracing::{debug, warn};

use meterbus_core::driver::DriverStatus;
use meterbus_core::error::{MeterbusError, MeterbusResult};

use super::DigitalIoConfig;

/// GPIO-based digital I/O driver
pub struct GpioDigitalIoDriver {
    config: DigitalIoConfig,
    status: DriverStatus,
    pins: HashMap<u64, Pin>,
}

impl GpioDigitalIoDriver {
    pub fn new(config: DigitalIoConfig) -> MeterbusResult<Self> {
        Ok(Self {
            config,
            status: DriverStatus::Uninitialized,
            pins: HashMap::new(),
        })
    }

    fn init_pin(&mut self, pin_num: u64, level: bool) -> MeterbusResult<()> {
        let pin = Pin::new(pin_num);

        pin.export().map_err(|e| {
            MeterbusError::driver(format!("Failed to export GPIO {}: {}", pin_num, e))
        })?;

        // sysfs needs a moment before the direction file is writable
        thread::sleep(Duration::from_millis(10));

        // Setting the direction with a level avoids a glitch on the line
        let direction = if level { Direction::High } else { Direction::Low };
        pin.set_direction(direction).map_err(|e| {
            MeterbusError::driver(format!("Failed to set GPIO {} direction: {}", pin_num, e))
        })?;

        debug!(pin = pin_num, level, "gpio exported");
        self.pins.insert(pin_num, pin);
        Ok(())
    }

    fn ensure_operational(&mut self) -> MeterbusResult<()> {
        if !self.status.is_operational() {
            return Err(MeterbusError::driver("Driver not initialized"));
        }
        self.status = DriverStatus::Running;
        Ok(())
    }

    // ========================================================================
    // Lifecycle methods
    // ========================================================================

    pub fn init(&mut self) -> MeterbusResult<()> {
        for pin_config in self.config.pins.clone() {
            self.init_pin(pin_config.pin, pin_config.initial_value != pin_config.inverted)?;
        }
        self.status = DriverStatus::Ready;
        Ok(())
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        // Outputs go back to logical low (receive) before unexporting
        for (pin_num, pin) in &self.pins {
            let level = u8::from(self.config.inversion(*pin_num).unwrap_or(false));
            if let Err(e) = pin.set_value(level) {
                warn!(pin = pin_num, error = %e, "failed to release gpio");
            }
            let _ = pin.unexport();
        }

        self.pins.clear();
        self.status = DriverStatus::Shutdown;
        Ok(())
    }

    pub fn is_available(&self) -> bool {
        std::path::Path::new("/sys/class/gpio").exists()
    }

    pub fn status(&self) -> DriverStatus {
        self.status.clone()
    }

    // ========================================================================
    // Digital I/O methods
    // ========================================================================

    pub fn write_pin(&mut self, pin_num: u64, value: bool) -> MeterbusResult<()> {
        self.ensure_operational()?;

        let inverted = self.config.inversion(pin_num).ok_or_else(|| {
            MeterbusError::driver(format!("Pin {} is not configured as output", pin_num))
        })?;
        let pin = self
            .pins
            .get(&pin_num)
            .ok_or_else(|| MeterbusError::driver(format!("Pin {} not exported", pin_num)))?;

        let level = value != inverted;
        pin.set_value(u8::from(level)).map_err(|e| {
            MeterbusError::driver(format!("Failed to write GPIO {}: {}", pin_num, e))
        })
    }
}
