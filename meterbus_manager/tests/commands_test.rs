// CLI commands against simulated meters loaded from a config file
use std::fs;

use meterbus_core::{BusConfig, MeterbusError, RegisterSpace};
use meterbus_manager::commands::{meter, profiles};

const CONFIG: &str = r#"
meters:
  mains:
    backend: simulation
    profile: pzem004t
    inter_frame_delay_ms: 0
  solar:
    backend: simulation
    profile: pzem6l24
    slave_address: 16
    inter_frame_delay_ms: 0
  spare:
    backend: simulation
    profile: sdm120
    enabled: false
"#;

fn load() -> BusConfig {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meterbus.yaml");
    fs::write(&path, CONFIG).unwrap();
    BusConfig::from_file(&path).unwrap()
}

#[test]
fn test_read_once() {
    let config = load();
    meter::read_meter(&config, "mains", None, false).unwrap();
    meter::read_meter(&config, "solar", None, true).unwrap();
}

#[test]
fn test_read_enabled_skips_disabled() {
    let config = load();
    // The disabled meter has an unknown profile and would fail to open
    meter::read_enabled(&config, false).unwrap();
    let err = meter::read_enabled(&BusConfig::new(), true).unwrap_err();
    assert!(matches!(err, MeterbusError::Config(_)));
}

#[test]
fn test_raw_and_write() {
    let config = load();
    meter::raw_registers(&config, "mains", RegisterSpace::Input, 0, 10, false).unwrap();
    meter::raw_registers(&config, "solar", RegisterSpace::Holding, 0x0026, 2, true).unwrap();

    meter::write_register(&config, "mains", 0x0001, 2300).unwrap();
    // Unmapped register comes back as an exception
    let err = meter::write_register(&config, "mains", 0x0100, 1).unwrap_err();
    assert!(err.is_exception());
}

#[test]
fn test_address_and_reset() {
    let config = load();
    meter::set_address(&config, "mains", 0x05).unwrap();
    assert!(meter::set_address(&config, "mains", 0).unwrap_err().is_invalid_argument());
    // Three-phase model keeps its address out of reach
    assert!(meter::set_address(&config, "solar", 0x05).is_err());

    meter::reset_energy(&config, "mains").unwrap();
    meter::reset_energy(&config, "solar").unwrap();
}

#[test]
fn test_unknown_meter_and_profile() {
    let config = load();
    assert!(meter::read_meter(&config, "attic", None, false).is_err());
    assert!(meter::read_meter(&config, "spare", None, false).is_err());
}

#[test]
fn test_list_profiles() {
    let config = load();
    profiles::list_profiles(Some(&config), true, false).unwrap();
    profiles::list_profiles(None, false, true).unwrap();
}
