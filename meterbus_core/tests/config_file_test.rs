// Config files written to disk and read back, in both formats
use meterbus_core::{
    BusConfig, ByteOrder, FieldLayout, MeterConfig, QuantitySpec, RegisterProfile, RegisterSpace,
    ResetStyle,
};

fn custom_profile() -> RegisterProfile {
    RegisterProfile {
        name: "bench_meter".to_string(),
        description: "Lab meter with signed power".to_string(),
        space: RegisterSpace::Holding,
        register_order: ByteOrder::HighFirst,
        quantities: vec![
            QuantitySpec::new("voltage", "V", 0x0000, FieldLayout::Single, 0.1),
            QuantitySpec::new(
                "power",
                "W",
                0x0001,
                FieldLayout::Pair {
                    order: ByteOrder::HighFirst,
                    signed: true,
                },
                0.1,
            ),
        ],
        address_register: None,
        settings: Vec::new(),
        reset: ResetStyle::WithPhase { selector: 0x0F },
    }
}

fn sample_config() -> BusConfig {
    let mut config = BusConfig::new();
    let mut mains = MeterConfig::serial("pzem004t", "/dev/ttyUSB0", 9600);
    mains.direction_pin = Some(17);
    mains.sample_time_ms = 250;
    config.add_meter("mains", mains);
    config.add_meter("bench", MeterConfig::simulation("bench_meter"));
    config.add_profile(custom_profile());
    config
}

#[test]
fn test_yaml_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meterbus.yaml");

    sample_config().save(&path).unwrap();
    let loaded = BusConfig::from_file(&path).unwrap();

    let mains = loaded.get_meter("mains").unwrap();
    assert_eq!(mains.port.as_deref(), Some("/dev/ttyUSB0"));
    assert_eq!(mains.direction_pin, Some(17));
    assert_eq!(mains.sample_time_ms, 250);

    let profile = loaded.get_profile("bench_meter").unwrap();
    assert_eq!(profile, &custom_profile());
}

#[test]
fn test_toml_file_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meterbus.toml");

    sample_config().save(&path).unwrap();
    let loaded = BusConfig::from_file(&path).unwrap();

    assert!(loaded.get_meter("bench").unwrap().is_simulation());
    assert_eq!(
        loaded.get_profile("bench_meter").unwrap().reset,
        ResetStyle::WithPhase { selector: 0x0F }
    );
}

#[test]
fn test_unknown_extension_falls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meters.conf");
    std::fs::write(
        &path,
        "meters:\n  garage:\n    profile: pzem003\n    slave_address: 7\n",
    )
    .unwrap();

    let loaded = BusConfig::from_file(&path).unwrap();
    assert_eq!(loaded.get_meter("garage").unwrap().slave_address, 7);
}

#[test]
fn test_invalid_custom_profile_rejected() {
    let yaml = r#"
profiles:
  empty:
    name: empty
    quantities: []
"#;
    let err = BusConfig::from_yaml(yaml).unwrap_err();
    assert!(err.to_string().contains("no quantities"));
}

#[test]
fn test_missing_file_is_config_error() {
    let err = BusConfig::from_file("/nonexistent/meterbus.yaml").unwrap_err();
    assert!(matches!(err, meterbus_core::MeterbusError::Config(_)));
}
