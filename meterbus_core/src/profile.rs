//! Register profile model
//!
//! A register profile describes where a meter keeps its measurements, how
//! raw registers scale to physical units, and how multi-register values are
//! laid out. Byte order and signedness are properties of the device and its
//! firmware, so they are always spelled out here and never guessed at runtime.

use serde::{Deserialize, Serialize};

/// Order of the two halves of a composed value
///
/// Used both for the two bytes of one register on the wire and for the two
/// registers of a 32-bit pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// First half is the least significant one
    LowFirst,
    /// First half is the most significant one (Modbus network order)
    #[default]
    HighFirst,
}

/// Register address space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegisterSpace {
    /// Read/write registers, function 0x03
    Holding,
    /// Read-only registers, function 0x04
    #[default]
    Input,
}

impl RegisterSpace {
    /// Function code used to read this space
    pub fn read_function(&self) -> u8 {
        match self {
            Self::Holding => 0x03,
            Self::Input => 0x04,
        }
    }
}

impl std::fmt::Display for RegisterSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Holding => write!(f, "holding"),
            Self::Input => write!(f, "input"),
        }
    }
}

impl std::str::FromStr for RegisterSpace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "holding" | "h" | "3" | "0x03" => Ok(Self::Holding),
            "input" | "i" | "4" | "0x04" => Ok(Self::Input),
            other => Err(format!("unknown register space '{}'", other)),
        }
    }
}

/// How a quantity is packed into registers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldLayout {
    /// One unsigned register
    Single,
    /// One register, two's complement
    SingleSigned,
    /// Two consecutive registers forming a 32-bit value
    Pair { order: ByteOrder, signed: bool },
    /// Upper byte of one register
    HighByte,
    /// Lower byte of one register
    LowByte,
    /// Alarm flag, 0xFFFF means active
    Flag,
}

impl FieldLayout {
    /// Number of registers occupied
    pub fn width(&self) -> u16 {
        match self {
            Self::Pair { .. } => 2,
            _ => 1,
        }
    }
}

/// One measurement exposed by a meter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantitySpec {
    /// Lookup key, e.g. "voltage" or "active_power_b"
    pub name: String,
    /// Physical unit, informational
    #[serde(default)]
    pub unit: String,
    /// First register of the field
    pub address: u16,
    pub layout: FieldLayout,
    /// Multiplier from raw integer to physical unit
    #[serde(default = "default_scale")]
    pub scale: f64,
}

fn default_scale() -> f64 {
    1.0
}

impl QuantitySpec {
    pub fn new(name: &str, unit: &str, address: u16, layout: FieldLayout, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            address,
            layout,
            scale,
        }
    }

    /// One past the last register this quantity occupies
    pub fn end(&self) -> u16 {
        self.address.saturating_add(self.layout.width())
    }
}

/// A writable configuration register in the holding space
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingSpec {
    pub name: String,
    #[serde(default)]
    pub unit: String,
    pub address: u16,
    #[serde(default = "default_scale")]
    pub scale: f64,
}

impl SettingSpec {
    pub fn new(name: &str, unit: &str, address: u16, scale: f64) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            address,
            scale,
        }
    }
}

/// Shape of the vendor energy-reset frame (function 0x42)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetStyle {
    /// `[addr][0x42][crc]`
    #[default]
    Bare,
    /// `[addr][0x42][0x00][selector][crc]`
    WithPhase { selector: u8 },
}

/// Complete description of a meter model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterProfile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Space the measurements live in
    #[serde(default)]
    pub space: RegisterSpace,
    /// Byte order of each register on the wire
    #[serde(default)]
    pub register_order: ByteOrder,
    pub quantities: Vec<QuantitySpec>,
    /// Holding register carrying the slave address, if the model exposes it
    #[serde(default)]
    pub address_register: Option<u16>,
    #[serde(default)]
    pub settings: Vec<SettingSpec>,
    #[serde(default)]
    pub reset: ResetStyle,
}

impl RegisterProfile {
    pub fn quantity(&self, name: &str) -> Option<&QuantitySpec> {
        self.quantities.iter().find(|q| q.name == name)
    }

    pub fn setting(&self, name: &str) -> Option<&SettingSpec> {
        self.settings.iter().find(|s| s.name == name)
    }

    /// Smallest register window covering every quantity, as (start, count)
    pub fn span(&self) -> Option<(u16, u16)> {
        let start = self.quantities.iter().map(|q| q.address).min()?;
        let end = self.quantities.iter().map(|q| q.end()).max()?;
        Some((start, end - start))
    }

    /// Sanity checks run when a profile is loaded from a config file
    pub fn validate(&self) -> Result<(), String> {
        if self.quantities.is_empty() {
            return Err(format!("profile '{}' has no quantities", self.name));
        }
        for (i, q) in self.quantities.iter().enumerate() {
            if self.quantities[..i].iter().any(|other| other.name == q.name) {
                return Err(format!(
                    "profile '{}' declares '{}' twice",
                    self.name, q.name
                ));
            }
            if !q.scale.is_finite() {
                return Err(format!("quantity '{}' has a non-finite scale", q.name));
            }
        }
        if let Some((_, count)) = self.span() {
            if count > 125 {
                return Err(format!(
                    "profile '{}' spans {} registers, more than one read can return",
                    self.name, count
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RegisterProfile {
        RegisterProfile {
            name: "sample".to_string(),
            description: String::new(),
            space: RegisterSpace::Input,
            register_order: ByteOrder::HighFirst,
            quantities: vec![
                QuantitySpec::new("voltage", "V", 0x0000, FieldLayout::Single, 0.1),
                QuantitySpec::new(
                    "power",
                    "W",
                    0x0003,
                    FieldLayout::Pair {
                        order: ByteOrder::LowFirst,
                        signed: false,
                    },
                    0.1,
                ),
            ],
            address_register: Some(0x0002),
            settings: Vec::new(),
            reset: ResetStyle::Bare,
        }
    }

    #[test]
    fn test_span_covers_pairs() {
        assert_eq!(sample().span(), Some((0x0000, 5)));
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut profile = sample();
        assert!(profile.validate().is_ok());
        profile
            .quantities
            .push(QuantitySpec::new("voltage", "V", 0x0009, FieldLayout::Single, 1.0));
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_register_space_parse() {
        assert_eq!("holding".parse::<RegisterSpace>(), Ok(RegisterSpace::Holding));
        assert_eq!("0x04".parse::<RegisterSpace>(), Ok(RegisterSpace::Input));
        assert!("coils".parse::<RegisterSpace>().is_err());
        assert_eq!(RegisterSpace::Holding.read_function(), 0x03);
    }

    #[test]
    fn test_layout_yaml() {
        let yaml = "kind: pair\norder: low_first\nsigned: true\n";
        let layout: FieldLayout = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            layout,
            FieldLayout::Pair {
                order: ByteOrder::LowFirst,
                signed: true
            }
        );
        assert_eq!(layout.width(), 2);
    }
}
