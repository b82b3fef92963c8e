//! Built-in register profiles for the PZEM family
//!
//! Two-register fields are sent low register first by these meters and are
//! unsigned. A config file can declare a profile under the same name to
//! override any of it.

use meterbus_core::config::BusConfig;
use meterbus_core::error::{MeterbusError, MeterbusResult};
use meterbus_core::profile::{
    ByteOrder, FieldLayout, QuantitySpec, RegisterProfile, RegisterSpace, ResetStyle, SettingSpec,
};

/// Names accepted by [`builtin`]
pub const BUILTIN_NAMES: &[&str] = &["pzem004t", "pzem003", "pzem017", "pzem6l24"];

/// Reset selector clearing every counter of a three-phase meter
pub const RESET_ALL_PHASES: u8 = 0x0F;

const PAIR: FieldLayout = FieldLayout::Pair {
    order: ByteOrder::LowFirst,
    signed: false,
};

fn q(name: &str, unit: &str, address: u16, layout: FieldLayout, scale: f64) -> QuantitySpec {
    QuantitySpec::new(name, unit, address, layout, scale)
}

/// PZEM-004T v3 (also PZEM-014 and PZEM-016), single phase AC
pub fn pzem004t() -> RegisterProfile {
    RegisterProfile {
        name: "pzem004t".to_string(),
        description: "PZEM-004T/014/016 single phase AC meter".to_string(),
        space: RegisterSpace::Input,
        register_order: ByteOrder::HighFirst,
        quantities: vec![
            q("voltage", "V", 0x0000, FieldLayout::Single, 0.1),
            q("current", "A", 0x0001, PAIR, 0.001),
            q("power", "W", 0x0003, PAIR, 0.1),
            q("energy", "Wh", 0x0005, PAIR, 1.0),
            q("frequency", "Hz", 0x0007, FieldLayout::Single, 0.1),
            q("power_factor", "", 0x0008, FieldLayout::Single, 0.01),
            q("power_alarm", "", 0x0009, FieldLayout::Flag, 1.0),
        ],
        address_register: Some(0x0002),
        settings: vec![SettingSpec::new("power_alarm_threshold", "W", 0x0001, 1.0)],
        reset: ResetStyle::Bare,
    }
}

fn dc_quantities() -> Vec<QuantitySpec> {
    vec![
        q("voltage", "V", 0x0000, FieldLayout::Single, 0.01),
        q("current", "A", 0x0001, FieldLayout::Single, 0.01),
        q("power", "W", 0x0002, PAIR, 0.1),
        q("energy", "Wh", 0x0004, PAIR, 1.0),
        q("high_voltage_alarm", "", 0x0006, FieldLayout::Flag, 1.0),
        q("low_voltage_alarm", "", 0x0007, FieldLayout::Flag, 1.0),
    ]
}

fn dc_settings() -> Vec<SettingSpec> {
    vec![
        SettingSpec::new("high_voltage_threshold", "V", 0x0000, 0.01),
        SettingSpec::new("low_voltage_threshold", "V", 0x0001, 0.01),
    ]
}

/// PZEM-003, DC meter with internal shunt
pub fn pzem003() -> RegisterProfile {
    RegisterProfile {
        name: "pzem003".to_string(),
        description: "PZEM-003 DC meter".to_string(),
        space: RegisterSpace::Input,
        register_order: ByteOrder::HighFirst,
        quantities: dc_quantities(),
        address_register: Some(0x0002),
        settings: dc_settings(),
        reset: ResetStyle::Bare,
    }
}

/// PZEM-017, DC meter with external shunt and a current range register
pub fn pzem017() -> RegisterProfile {
    let mut settings = dc_settings();
    settings.push(SettingSpec::new("current_range", "", 0x0003, 1.0));
    RegisterProfile {
        name: "pzem017".to_string(),
        description: "PZEM-017 DC meter, external shunt".to_string(),
        settings,
        ..pzem003()
    }
}

/// PZEM-6L24, three phase AC
pub fn pzem6l24() -> RegisterProfile {
    let mut quantities = Vec::new();
    let phases = ["a", "b", "c"];

    for (i, phase) in phases.iter().enumerate() {
        let i = i as u16;
        quantities.push(q(&format!("voltage_{phase}"), "V", i, FieldLayout::Single, 0.1));
        quantities.push(q(&format!("current_{phase}"), "A", 0x0003 + i, FieldLayout::Single, 0.01));
        quantities.push(q(&format!("frequency_{phase}"), "Hz", 0x0006 + i, FieldLayout::Single, 0.01));
    }
    // Phase A voltage is the reference angle
    quantities.push(q("voltage_angle_b", "deg", 0x0009, FieldLayout::Single, 0.01));
    quantities.push(q("voltage_angle_c", "deg", 0x000A, FieldLayout::Single, 0.01));
    for (i, phase) in phases.iter().enumerate() {
        let i = i as u16;
        quantities.push(q(&format!("current_angle_{phase}"), "deg", 0x000B + i, FieldLayout::Single, 0.01));
    }

    let powers = [("active", "W", 0x000E), ("reactive", "var", 0x0014), ("apparent", "VA", 0x001A)];
    for (kind, unit, base) in powers {
        for (i, phase) in phases.iter().enumerate() {
            let address = base + 2 * i as u16;
            quantities.push(q(&format!("{kind}_power_{phase}"), unit, address, PAIR, 0.1));
        }
    }
    for (i, (kind, unit, _)) in powers.iter().enumerate() {
        let address = 0x0020 + 2 * i as u16;
        quantities.push(q(&format!("{kind}_power_total"), unit, address, PAIR, 0.1));
    }

    quantities.push(q("power_factor_a", "", 0x0026, FieldLayout::HighByte, 0.01));
    quantities.push(q("power_factor_b", "", 0x0026, FieldLayout::LowByte, 0.01));
    quantities.push(q("power_factor_c", "", 0x0027, FieldLayout::HighByte, 0.01));
    quantities.push(q("power_factor_total", "", 0x0027, FieldLayout::LowByte, 0.01));

    let energies = [("active", "kWh", 0x0028), ("reactive", "kvarh", 0x002E), ("apparent", "kVAh", 0x0034)];
    for (kind, unit, base) in energies {
        for (i, phase) in phases.iter().enumerate() {
            let address = base + 2 * i as u16;
            quantities.push(q(&format!("{kind}_energy_{phase}"), unit, address, PAIR, 0.1));
        }
    }
    for (i, (kind, unit, _)) in energies.iter().enumerate() {
        let address = 0x003A + 2 * i as u16;
        quantities.push(q(&format!("{kind}_energy_total"), unit, address, PAIR, 0.1));
    }

    RegisterProfile {
        name: "pzem6l24".to_string(),
        description: "PZEM-6L24 three phase AC meter".to_string(),
        space: RegisterSpace::Holding,
        register_order: ByteOrder::HighFirst,
        quantities,
        address_register: None,
        settings: Vec::new(),
        reset: ResetStyle::WithPhase {
            selector: RESET_ALL_PHASES,
        },
    }
}

/// Built-in profile by name
pub fn builtin(name: &str) -> Option<RegisterProfile> {
    match name.to_ascii_lowercase().as_str() {
        "pzem004t" | "pzem014" | "pzem016" => Some(pzem004t()),
        "pzem003" => Some(pzem003()),
        "pzem017" => Some(pzem017()),
        "pzem6l24" => Some(pzem6l24()),
        _ => None,
    }
}

/// Every built-in profile, in [`BUILTIN_NAMES`] order
pub fn all_builtin() -> Vec<RegisterProfile> {
    BUILTIN_NAMES.iter().filter_map(|name| builtin(name)).collect()
}

/// Custom profile from the config file, else the built-in one
pub fn resolve(name: &str, config: &BusConfig) -> MeterbusResult<RegisterProfile> {
    if let Some(profile) = config.get_profile(name) {
        return Ok(profile.clone());
    }
    builtin(name).ok_or_else(|| MeterbusError::config(format!("Unknown register profile '{}'", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_are_valid() {
        for profile in all_builtin() {
            profile.validate().unwrap();
        }
        assert_eq!(all_builtin().len(), BUILTIN_NAMES.len());
    }

    #[test]
    fn test_pzem004t_span() {
        assert_eq!(pzem004t().span(), Some((0x0000, 10)));
    }

    #[test]
    fn test_pzem6l24_layout() {
        let profile = pzem6l24();
        assert_eq!(profile.span(), Some((0x0000, 0x40)));
        assert_eq!(profile.quantity("apparent_power_c").unwrap().address, 0x001E);
        assert_eq!(profile.quantity("reactive_power_total").unwrap().address, 0x0022);
        assert_eq!(profile.quantity("apparent_energy_total").unwrap().address, 0x003E);
        assert_eq!(profile.quantity("current_angle_c").unwrap().address, 0x000D);
        assert_eq!(profile.reset, ResetStyle::WithPhase { selector: 0x0F });
    }

    #[test]
    fn test_aliases() {
        assert_eq!(builtin("PZEM016").unwrap().name, "pzem004t");
        assert!(builtin("pzem017").unwrap().setting("current_range").is_some());
        assert!(builtin("pzem003").unwrap().setting("current_range").is_none());
        assert!(builtin("sdm120").is_none());
    }

    #[test]
    fn test_config_profile_wins() {
        let mut config = BusConfig::new();
        let mut custom = pzem004t();
        custom.description = "patched firmware".to_string();
        config.add_profile(custom);

        assert_eq!(resolve("pzem004t", &config).unwrap().description, "patched firmware");
        assert!(resolve("pzem003", &config).is_ok());
        assert!(resolve("nope", &config).is_err());
    }
}
