//! Commands that talk to a configured meter

use std::thread;
use std::time::Duration;

use colored::*;
use tracing::debug;

use meterbus_core::config::BusConfig;
use meterbus_core::error::{MeterbusError, MeterbusResult};
use meterbus_core::profile::RegisterSpace;
use meterbus_library::{Meter, Reading, Readings, SerialDriver};

fn open(config: &BusConfig, name: &str) -> MeterbusResult<Meter<SerialDriver>> {
    let meter = Meter::open(name, config)?;
    debug!(
        meter = name,
        profile = %meter.profile().name,
        address = meter.session().slave_address(),
        "opened"
    );
    Ok(meter)
}

/// One reading as a table cell, `---` when the value is missing
pub fn format_value(reading: &Reading) -> String {
    if reading.value.is_nan() {
        "---".to_string()
    } else if reading.unit.is_empty() {
        format!("{:.3}", reading.value)
    } else {
        format!("{:.3} {}", reading.value, reading.unit)
    }
}

fn print_readings(name: &str, readings: &Readings) {
    let stamp = chrono::Local::now().format("%H:%M:%S%.3f");
    println!("{} {}", name.green().bold(), stamp.to_string().dimmed());
    for reading in readings.iter() {
        let value = format_value(reading);
        let value = if reading.value.is_nan() {
            value.red()
        } else {
            value.white()
        };
        println!("  {:<24} {:>18}", reading.name.cyan(), value);
    }
    println!();
}

fn print_json(name: &str, readings: &Readings) -> MeterbusResult<()> {
    let output = serde_json::json!({
        "meter": name,
        "timestamp": chrono::Local::now().to_rfc3339(),
        "valid": readings.is_valid(),
        "readings": readings.values,
    });
    println!("{}", serde_json::to_string(&output)?);
    Ok(())
}

/// Poll a meter once, or every `watch_ms` until interrupted
pub fn read_meter(config: &BusConfig, name: &str, watch_ms: Option<u64>, json: bool) -> MeterbusResult<()> {
    let mut meter = open(config, name)?;

    loop {
        let readings = meter.read_all();
        if json {
            print_json(name, &readings)?;
        } else {
            print_readings(name, &readings);
        }

        match watch_ms {
            Some(interval) => thread::sleep(Duration::from_millis(interval)),
            None => break,
        }
    }

    if !json {
        let stats = meter.session().stats();
        println!(
            "  {} {} transaction(s), {} timeout(s), {} CRC error(s), {} exception(s)",
            "Stats:".dimmed(),
            stats.transactions,
            stats.timeouts,
            stats.crc_errors,
            stats.exceptions
        );
    }
    meter.shutdown()
}

/// Poll every enabled meter once
pub fn read_enabled(config: &BusConfig, json: bool) -> MeterbusResult<()> {
    let meters = config.enabled_meters();
    if meters.is_empty() {
        return Err(MeterbusError::config("No enabled meters in config"));
    }
    for (name, _) in meters {
        let mut meter = open(config, name)?;
        let readings = meter.read_all();
        if json {
            print_json(name, &readings)?;
        } else {
            print_readings(name, &readings);
        }
        meter.shutdown()?;
    }
    Ok(())
}

/// Dump a block of raw registers
pub fn raw_registers(
    config: &BusConfig,
    name: &str,
    space: RegisterSpace,
    start: u16,
    count: u16,
    json: bool,
) -> MeterbusResult<()> {
    let mut meter = open(config, name)?;
    let registers = meter.session_mut().read_registers(space, start, count)?;

    if json {
        let output = serde_json::json!({
            "meter": name,
            "space": space,
            "start": start,
            "registers": registers,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!(
            "  {:<8} {:>8} {:>8}",
            "REG".dimmed(),
            "HEX".dimmed(),
            "DEC".dimmed()
        );
        println!("  {}", "-".repeat(26).dimmed());
        for (offset, value) in registers.iter().enumerate() {
            let register = start as usize + offset;
            println!("  0x{:04X}   0x{:04X} {:>8}", register, value, value);
        }
    }
    meter.shutdown()
}

/// Write one holding register
pub fn write_register(config: &BusConfig, name: &str, register: u16, value: u16) -> MeterbusResult<()> {
    let mut meter = open(config, name)?;
    meter.session_mut().write_single_register(register, value)?;
    println!(
        "{} Wrote {} = {}",
        "✓".green(),
        format!("0x{:04X}", register).cyan(),
        value.to_string().white()
    );
    meter.shutdown()
}

/// Move a meter to a new slave address
///
/// The config file is not rewritten; update `slave_address` afterwards
/// unless the meter is reached through the general address.
pub fn set_address(config: &BusConfig, name: &str, address: u8) -> MeterbusResult<()> {
    let mut meter = open(config, name)?;
    let old = meter.session().slave_address();
    meter.set_address(address)?;
    println!(
        "{} Moved {} 0x{:02X} -> {}",
        "✓".green(),
        name.cyan(),
        old,
        format!("0x{:02X}", address).white()
    );
    meter.shutdown()
}

/// Clear the energy counters
pub fn reset_energy(config: &BusConfig, name: &str) -> MeterbusResult<()> {
    let mut meter = open(config, name)?;
    meter.reset_energy()?;
    println!("{} Energy counters of {} cleared", "✓".green(), name.cyan());
    meter.shutdown()
}
