//! Register-profile driven meters
//!
//! A [`Meter`] turns a [`RegisterProfile`] and an [`RtuSession`] into
//! physical readings. Accessors come in two flavours: `try_*` methods return
//! typed errors, the plain ones return sentinels (NaN for measurements and
//! settings, `0xFF` for the address, `false` for alarms). A batch read that
//! fails yields NaN for every quantity, never a mix of fresh and stale values.

pub mod profiles;

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, warn};

use meterbus_core::config::{BusConfig, MeterConfig};
use meterbus_core::error::{MeterbusError, MeterbusResult};
use meterbus_core::profile::{FieldLayout, QuantitySpec, RegisterProfile, ResetStyle};

use crate::drivers::digital_io::{DigitalIoConfig, DigitalIoDriver, DigitalIoDriverBackend};
use crate::drivers::modbus::{
    compose, DirectionLine, RtuSession, SessionConfig, SimulatedSlave, TransceiverDirector,
};
use crate::drivers::serial::{
    ByteStream, SerialConfig, SerialDriver, SerialDriverBackend, SimulationSerialDriver,
};

/// Address accessor sentinel
pub const INVALID_ADDRESS: u8 = 0xFF;

/// Current ranges of the PZEM-017 external shunt and their register codes
pub const CURRENT_RANGES: [(u16, u16); 4] = [(100, 0), (50, 1), (200, 2), (300, 3)];

/// One decoded quantity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    pub name: String,
    pub unit: String,
    pub value: f64,
}

/// Every quantity of a profile from one batch read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Readings {
    pub values: Vec<Reading>,
}

impl Readings {
    /// All quantities of `profile` set to NaN
    pub fn invalid(profile: &RegisterProfile) -> Self {
        Self {
            values: profile
                .quantities
                .iter()
                .map(|q| Reading {
                    name: q.name.clone(),
                    unit: q.unit.clone(),
                    value: f64::NAN,
                })
                .collect(),
        }
    }

    /// Value by name, NaN when unknown
    pub fn get(&self, name: &str) -> f64 {
        self.values
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.value)
            .unwrap_or(f64::NAN)
    }

    /// True when no quantity holds the sentinel
    pub fn is_valid(&self) -> bool {
        !self.values.is_empty() && self.values.iter().all(|r| !r.value.is_nan())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reading> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Physical value of `spec` from a register window starting at `base`
pub fn decode_quantity(spec: &QuantitySpec, registers: &[u16], base: u16) -> Option<f64> {
    let index = spec.address.checked_sub(base)? as usize;
    let first = *registers.get(index)?;
    let raw: i64 = match spec.layout {
        FieldLayout::Single => first as i64,
        FieldLayout::SingleSigned => first as i16 as i64,
        FieldLayout::Pair { order, signed } => {
            compose(first, *registers.get(index + 1)?, order, signed)
        }
        FieldLayout::HighByte => (first >> 8) as i64,
        FieldLayout::LowByte => (first & 0x00FF) as i64,
        FieldLayout::Flag => return Some(if first == 0xFFFF { 1.0 } else { 0.0 }),
    };
    Some(raw as f64 * spec.scale)
}

struct CachedReadings {
    taken: Instant,
    readings: Readings,
}

/// A metering device on the bus
pub struct Meter<S: ByteStream> {
    profile: RegisterProfile,
    session: RtuSession<S>,
    /// Staleness window of the cache, zero disables it
    sample_time: Duration,
    cache: Option<CachedReadings>,
}

impl<S: ByteStream> Meter<S> {
    /// Meter over an existing session
    ///
    /// The session's register byte order is taken from the profile.
    pub fn new(mut session: RtuSession<S>, profile: RegisterProfile, sample_time: Duration) -> Self {
        session.set_register_order(profile.register_order);
        Self {
            profile,
            session,
            sample_time,
            cache: None,
        }
    }

    pub fn init(&mut self) -> MeterbusResult<()> {
        self.session.init()
    }

    pub fn shutdown(&mut self) -> MeterbusResult<()> {
        self.session.shutdown()
    }

    pub fn profile(&self) -> &RegisterProfile {
        &self.profile
    }

    pub fn session(&self) -> &RtuSession<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RtuSession<S> {
        &mut self.session
    }

    pub fn sample_time(&self) -> Duration {
        self.sample_time
    }

    pub fn set_sample_time(&mut self, sample_time: Duration) {
        self.sample_time = sample_time;
        self.cache = None;
    }

    /// Cached readings, if still within the staleness window
    pub fn cached(&self) -> Option<&Readings> {
        if self.sample_time.is_zero() {
            return None;
        }
        self.cache
            .as_ref()
            .filter(|c| c.taken.elapsed() < self.sample_time)
            .map(|c| &c.readings)
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    fn quantity(&self, name: &str) -> MeterbusResult<QuantitySpec> {
        self.profile.quantity(name).cloned().ok_or_else(|| {
            MeterbusError::invalid_argument(format!(
                "profile '{}' has no quantity '{}'",
                self.profile.name, name
            ))
        })
    }

    // ========================================================================
    // Measurements
    // ========================================================================

    /// Every quantity from one transaction spanning the profile
    pub fn try_read_all(&mut self) -> MeterbusResult<Readings> {
        if let Some(readings) = self.cached() {
            return Ok(readings.clone());
        }

        let (start, count) = self.profile.span().ok_or_else(|| {
            MeterbusError::config(format!("profile '{}' has no quantities", self.profile.name))
        })?;
        let registers = self
            .session
            .read_registers(self.profile.space, start, count)?;

        let mut values = Vec::with_capacity(self.profile.quantities.len());
        for spec in &self.profile.quantities {
            let value = decode_quantity(spec, &registers, start).ok_or_else(|| {
                MeterbusError::unexpected(format!("'{}' outside the register window", spec.name))
            })?;
            values.push(Reading {
                name: spec.name.clone(),
                unit: spec.unit.clone(),
                value,
            });
        }
        let readings = Readings { values };

        if !self.sample_time.is_zero() {
            self.cache = Some(CachedReadings {
                taken: Instant::now(),
                readings: readings.clone(),
            });
        }
        Ok(readings)
    }

    /// Every quantity, all NaN on failure
    pub fn read_all(&mut self) -> Readings {
        match self.try_read_all() {
            Ok(readings) => readings,
            Err(e) => {
                warn!(profile = %self.profile.name, error = %e, "batch read failed");
                Readings::invalid(&self.profile)
            }
        }
    }

    /// One quantity
    ///
    /// Served from the cache when it is enabled, otherwise only the
    /// registers of this quantity are read.
    pub fn try_read(&mut self, name: &str) -> MeterbusResult<f64> {
        let spec = self.quantity(name)?;
        if !self.sample_time.is_zero() {
            return Ok(self.try_read_all()?.get(name));
        }
        let registers = self.session.read_registers(
            self.profile.space,
            spec.address,
            spec.layout.width(),
        )?;
        decode_quantity(&spec, &registers, spec.address)
            .ok_or_else(|| MeterbusError::unexpected(format!("'{}' could not be decoded", name)))
    }

    /// One quantity, NaN on failure
    pub fn read(&mut self, name: &str) -> f64 {
        self.try_read(name).unwrap_or_else(|e| {
            debug!(quantity = name, error = %e, "read failed");
            f64::NAN
        })
    }

    pub fn try_alarm(&mut self, name: &str) -> MeterbusResult<bool> {
        Ok(self.try_read(name)? != 0.0)
    }

    /// Alarm flag, false on failure
    pub fn alarm(&mut self, name: &str) -> bool {
        self.try_alarm(name).unwrap_or(false)
    }

    // ========================================================================
    // Configuration registers
    // ========================================================================

    pub fn try_setting(&mut self, name: &str) -> MeterbusResult<f64> {
        let spec = self.profile.setting(name).cloned().ok_or_else(|| {
            MeterbusError::invalid_argument(format!(
                "profile '{}' has no setting '{}'",
                self.profile.name, name
            ))
        })?;
        let registers = self.session.read_holding_registers(spec.address, 1)?;
        Ok(registers[0] as f64 * spec.scale)
    }

    /// Setting value, NaN on failure
    pub fn setting(&mut self, name: &str) -> f64 {
        self.try_setting(name).unwrap_or(f64::NAN)
    }

    /// Write a setting in physical units
    pub fn set_setting(&mut self, name: &str, value: f64) -> MeterbusResult<()> {
        let spec = self.profile.setting(name).cloned().ok_or_else(|| {
            MeterbusError::invalid_argument(format!(
                "profile '{}' has no setting '{}'",
                self.profile.name, name
            ))
        })?;
        let raw = (value / spec.scale).round();
        if !raw.is_finite() || !(0.0..=u16::MAX as f64).contains(&raw) {
            return Err(MeterbusError::invalid_argument(format!(
                "{} {} does not fit register 0x{:04X}",
                value, spec.unit, spec.address
            )));
        }
        self.session.write_single_register(spec.address, raw as u16)?;
        self.cache = None;
        Ok(())
    }

    fn address_register(&self) -> MeterbusResult<u16> {
        self.profile.address_register.ok_or_else(|| {
            MeterbusError::invalid_argument(format!(
                "profile '{}' does not expose its address",
                self.profile.name
            ))
        })
    }

    /// Slave address stored in the device
    pub fn try_address(&mut self) -> MeterbusResult<u8> {
        let register = self.address_register()?;
        let registers = self.session.read_holding_registers(register, 1)?;
        u8::try_from(registers[0]).map_err(|_| {
            MeterbusError::unexpected(format!(
                "stored address 0x{:04X} does not fit in a byte",
                registers[0]
            ))
        })
    }

    /// Stored slave address, [`INVALID_ADDRESS`] on failure
    pub fn address(&mut self) -> u8 {
        self.try_address().unwrap_or(INVALID_ADDRESS)
    }

    /// Move the device to a new address and follow it
    pub fn set_address(&mut self, address: u8) -> MeterbusResult<()> {
        if !(1..=247).contains(&address) {
            return Err(MeterbusError::invalid_argument(format!(
                "new address {} outside 1..=247",
                address
            )));
        }
        let register = self.address_register()?;
        self.session.write_single_register(register, address as u16)?;
        self.session.set_slave_address(address)?;
        self.cache = None;
        Ok(())
    }

    /// Shunt range of a PZEM-017 in amps (50, 100, 200 or 300)
    pub fn set_current_range(&mut self, amps: u16) -> MeterbusResult<()> {
        let code = CURRENT_RANGES
            .iter()
            .find(|(range, _)| *range == amps)
            .map(|(_, code)| *code)
            .ok_or_else(|| {
                MeterbusError::invalid_argument(format!("unsupported current range {} A", amps))
            })?;
        let spec = self.profile.setting("current_range").cloned().ok_or_else(|| {
            MeterbusError::invalid_argument(format!(
                "profile '{}' has no current range register",
                self.profile.name
            ))
        })?;
        self.session.write_single_register(spec.address, code)?;
        self.cache = None;
        Ok(())
    }

    /// Configured shunt range in amps
    pub fn try_current_range(&mut self) -> MeterbusResult<u16> {
        let code = self.try_setting("current_range")? as u16;
        CURRENT_RANGES
            .iter()
            .find(|(_, c)| *c == code)
            .map(|(range, _)| *range)
            .ok_or_else(|| MeterbusError::unexpected(format!("unknown current range code {}", code)))
    }

    // ========================================================================
    // Energy counters
    // ========================================================================

    /// Clear the energy counters in the shape the profile declares
    pub fn reset_energy(&mut self) -> MeterbusResult<()> {
        self.session.reset_energy(self.profile.reset)?;
        self.cache = None;
        Ok(())
    }

    /// Clear the counters of one phase (three-phase meters only)
    pub fn reset_energy_phase(&mut self, selector: u8) -> MeterbusResult<()> {
        if !matches!(self.profile.reset, ResetStyle::WithPhase { .. }) {
            return Err(MeterbusError::invalid_argument(format!(
                "profile '{}' has no per-phase reset",
                self.profile.name
            )));
        }
        self.session
            .reset_energy(ResetStyle::WithPhase { selector })?;
        self.cache = None;
        Ok(())
    }
}

/// Direction line for a meter config, if it names a pin
fn direction_line(config: &MeterConfig) -> MeterbusResult<Option<DirectionLine>> {
    let Some(pin) = config.direction_pin else {
        return Ok(None);
    };
    let io_config = if config.direction_inverted {
        DigitalIoConfig::new().add_inverted_output(pin, false)
    } else {
        DigitalIoConfig::new().add_output(pin, false)
    };
    let backend = if config.is_simulation() {
        DigitalIoDriverBackend::Simulation
    } else {
        hardware_gpio_backend()?
    };
    let driver = DigitalIoDriver::new(backend, io_config)?;
    Ok(Some(DirectionLine::new(driver, pin)))
}

#[cfg(feature = "gpio-hardware")]
fn hardware_gpio_backend() -> MeterbusResult<DigitalIoDriverBackend> {
    Ok(DigitalIoDriverBackend::Gpio)
}

#[cfg(not(feature = "gpio-hardware"))]
fn hardware_gpio_backend() -> MeterbusResult<DigitalIoDriverBackend> {
    Err(MeterbusError::config(
        "direction_pin needs the gpio-hardware feature",
    ))
}

#[cfg(feature = "serial-hardware")]
fn hardware_serial_backend() -> MeterbusResult<SerialDriverBackend> {
    Ok(SerialDriverBackend::System)
}

#[cfg(not(feature = "serial-hardware"))]
fn hardware_serial_backend() -> MeterbusResult<SerialDriverBackend> {
    Err(MeterbusError::config(
        "serial backend needs the serial-hardware feature",
    ))
}

/// Demo values for a simulated meter of `profile`
fn demo_slave(address: u8, profile: &RegisterProfile) -> SimulatedSlave {
    let mut slave = SimulatedSlave::with_profile(address, profile);
    for spec in &profile.quantities {
        let value = match spec.name.as_str() {
            n if n.starts_with("voltage_angle") => 120.0,
            n if n.starts_with("current_angle") => 15.0,
            n if n.starts_with("voltage") => 230.0,
            n if n.starts_with("current") => 5.0,
            n if n.starts_with("frequency") => 50.0,
            n if n.starts_with("power_factor") => 0.95,
            n if n.contains("power") && !n.contains("alarm") => 1092.5,
            n if n.contains("energy") => 1234.0,
            _ => 0.0,
        };
        slave.set_quantity(profile.space, spec, value);
    }
    slave
}

impl Meter<SerialDriver> {
    /// Build and initialise the meter `name` of a bus config
    ///
    /// Simulation meters get a port wired to a simulated slave with demo
    /// readings; serial meters open the configured port.
    pub fn open(name: &str, config: &BusConfig) -> MeterbusResult<Self> {
        let meter = config.get_meter(name)?;
        if !meter.enabled {
            return Err(MeterbusError::config(format!("Meter '{}' is disabled", name)));
        }
        meter.validate()?;
        let profile = profiles::resolve(&meter.profile, config)?;

        let mut port = if meter.is_simulation() {
            let serial = SerialConfig::new("sim", meter.baud_rate);
            let slave = demo_slave(meter.slave_address, &profile);
            SerialDriver::Simulation(SimulationSerialDriver::with_responder(serial, slave))
        } else {
            let port_path = meter.port.as_deref().unwrap_or_default();
            SerialDriver::new(
                hardware_serial_backend()?,
                SerialConfig::new(port_path, meter.baud_rate),
            )?
        };
        port.init()?;

        let director = match direction_line(meter)? {
            Some(line) => {
                TransceiverDirector::with_line(line, Duration::from_millis(meter.settle_ms))
            }
            None => TransceiverDirector::automatic(),
        };
        let session = RtuSession::with_director(port, director, SessionConfig::from(meter));
        let mut meter_handle = Meter::new(
            session,
            profile,
            Duration::from_millis(meter.sample_time_ms),
        );
        meter_handle.init()?;
        debug!(meter = name, profile = %meter_handle.profile.name, "meter opened");
        Ok(meter_handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meterbus_core::profile::ByteOrder;

    #[test]
    fn test_decode_layouts() {
        let registers = [0x0898, 0x86A0, 0x0001, 0x5F32, 0xFFFF, 0xFFF6];
        let base = 0x0010;
        let voltage = QuantitySpec::new("v", "V", 0x0010, FieldLayout::Single, 0.1);
        approx::assert_relative_eq!(decode_quantity(&voltage, &registers, base).unwrap(), 220.0);

        let pair = FieldLayout::Pair {
            order: ByteOrder::LowFirst,
            signed: false,
        };
        let energy = QuantitySpec::new("e", "Wh", 0x0011, pair, 1.0);
        assert_eq!(decode_quantity(&energy, &registers, base), Some(100_000.0));

        let high = QuantitySpec::new("a", "", 0x0013, FieldLayout::HighByte, 0.01);
        let low = QuantitySpec::new("b", "", 0x0013, FieldLayout::LowByte, 0.01);
        assert_eq!(decode_quantity(&high, &registers, base), Some(0x5F as f64 * 0.01));
        assert_eq!(decode_quantity(&low, &registers, base), Some(0x32 as f64 * 0.01));

        let flag = QuantitySpec::new("alarm", "", 0x0014, FieldLayout::Flag, 1.0);
        assert_eq!(decode_quantity(&flag, &registers, base), Some(1.0));

        let signed = QuantitySpec::new("s", "", 0x0015, FieldLayout::SingleSigned, 1.0);
        assert_eq!(decode_quantity(&signed, &registers, base), Some(-10.0));
    }

    #[test]
    fn test_decode_outside_window() {
        let pair = FieldLayout::Pair {
            order: ByteOrder::HighFirst,
            signed: true,
        };
        let spec = QuantitySpec::new("p", "W", 0x0001, pair, 1.0);
        assert_eq!(decode_quantity(&spec, &[0, 0], 0x0000), None);
        assert_eq!(decode_quantity(&spec, &[0, 0, 0], 0x0002), None);
    }

    #[test]
    fn test_invalid_readings_are_all_nan() {
        let readings = Readings::invalid(&profiles::pzem004t());
        assert_eq!(readings.len(), 7);
        assert!(readings.iter().all(|r| r.value.is_nan()));
        assert!(!readings.is_valid());
        assert!(readings.get("voltage").is_nan());
        assert!(readings.get("missing").is_nan());
    }

    #[test]
    fn test_open_simulation_meter() {
        let mut config = BusConfig::new();
        let mut meter_config = MeterConfig::simulation("pzem004t");
        meter_config.inter_frame_delay_ms = 0;
        meter_config.direction_pin = Some(17);
        config.add_meter("mains", meter_config);

        let mut meter = Meter::open("mains", &config).unwrap();
        let readings = meter.read_all();
        assert!(readings.is_valid());
        approx::assert_relative_eq!(readings.get("voltage"), 230.0);
        assert!(meter.session().director().has_line());

        let port = meter.session_mut().stream_mut().as_simulation_mut().unwrap();
        let request = port.last_written().unwrap();
        assert_eq!(&request[..6], &[0xF8, 0x04, 0x00, 0x00, 0x00, 0x0A]);
    }

    #[test]
    fn test_open_inverted_direction_line() {
        let mut config = BusConfig::new();
        let mut meter_config = MeterConfig::simulation("pzem003");
        meter_config.inter_frame_delay_ms = 0;
        meter_config.direction_pin = Some(23);
        meter_config.direction_inverted = true;
        config.add_meter("solar", meter_config);

        let mut meter = Meter::open("solar", &config).unwrap();
        assert!(meter.read_all().is_valid());

        let line = meter.session().director().line().unwrap();
        let gpio = line.driver.as_simulation().unwrap();
        // Receive is logical low, which is a high pin on an active-low line
        assert_eq!(gpio.history().last(), Some(&(23, false)));
        assert_eq!(gpio.get_value(23), Some(true));
        assert!(gpio.history().contains(&(23, true)));
    }

    #[test]
    fn test_open_refuses_disabled_meter() {
        let mut config = BusConfig::new();
        let mut meter_config = MeterConfig::simulation("pzem004t");
        meter_config.enabled = false;
        config.add_meter("spare", meter_config);

        let err = Meter::open("spare", &config).err().unwrap();
        assert!(matches!(err, MeterbusError::Config(_)));
    }

    #[test]
    fn test_open_unknown_profile() {
        let mut config = BusConfig::new();
        config.add_meter("x", MeterConfig::simulation("mystery"));
        assert!(Meter::open("x", &config).is_err());
    }
}
