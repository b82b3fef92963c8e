//! Bus configuration (YAML/TOML support)
//!
//! # Example YAML
//!
//! ```yaml
//! meters:
//!   mains:
//!     backend: serial
//!     port: /dev/ttyUSB0
//!     baud_rate: 9600
//!     slave_address: 0xF8
//!     profile: pzem004t
//!     direction_pin: 17
//!     sample_time_ms: 500
//!
//!   solar:
//!     backend: simulation
//!     profile: pzem003
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{MeterbusError, MeterbusResult};
use crate::profile::RegisterProfile;

/// Modbus "general" address most PZEM meters answer to regardless of their
/// configured address
pub const GENERAL_ADDRESS: u8 = 0xF8;

/// Configuration for one meter on a bus
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeterConfig {
    /// Transport backend ("simulation" or "serial")
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Enable/disable the meter (default: true)
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Serial port path
    #[serde(default)]
    pub port: Option<String>,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_slave_address")]
    pub slave_address: u8,

    /// Built-in or custom register profile name
    pub profile: String,

    /// Overall timeout for read transactions
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,

    /// Overall timeout for write and reset transactions
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Silence after the last byte that ends a frame
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Delay after toggling the direction line
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    /// Delay between flushing a request and listening for the reply
    #[serde(default = "default_inter_frame_delay_ms")]
    pub inter_frame_delay_ms: u64,

    /// GPIO driving the transceiver DE/RE line, none for auto-direction adapters
    #[serde(default)]
    pub direction_pin: Option<u64>,

    /// Direction line is active low (transmit drives the pin low)
    #[serde(default)]
    pub direction_inverted: bool,

    /// Staleness window of the last-value cache, 0 disables it
    #[serde(default)]
    pub sample_time_ms: u64,
}

fn default_backend() -> String {
    "simulation".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_slave_address() -> u8 {
    GENERAL_ADDRESS
}

fn default_response_timeout_ms() -> u64 {
    100
}

fn default_write_timeout_ms() -> u64 {
    300
}

fn default_idle_timeout_ms() -> u64 {
    10
}

fn default_settle_ms() -> u64 {
    1
}

fn default_inter_frame_delay_ms() -> u64 {
    10
}

impl MeterConfig {
    /// Simulation meter with default timing
    pub fn simulation(profile: &str) -> Self {
        Self {
            backend: default_backend(),
            enabled: true,
            port: None,
            baud_rate: default_baud_rate(),
            slave_address: default_slave_address(),
            profile: profile.to_string(),
            response_timeout_ms: default_response_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            settle_ms: default_settle_ms(),
            inter_frame_delay_ms: default_inter_frame_delay_ms(),
            direction_pin: None,
            direction_inverted: false,
            sample_time_ms: 0,
        }
    }

    /// Serial meter with default timing
    pub fn serial(profile: &str, port: &str, baud_rate: u32) -> Self {
        Self {
            backend: "serial".to_string(),
            port: Some(port.to_string()),
            baud_rate,
            ..Self::simulation(profile)
        }
    }

    /// Check if this is a simulation backend
    pub fn is_simulation(&self) -> bool {
        self.backend == "simulation" || self.backend.starts_with("sim")
    }

    pub fn validate(&self) -> MeterbusResult<()> {
        if !self.is_simulation() && self.port.is_none() {
            return Err(MeterbusError::config(format!(
                "backend '{}' needs a port",
                self.backend
            )));
        }
        if self.idle_timeout_ms >= self.response_timeout_ms {
            return Err(MeterbusError::config(format!(
                "idle_timeout_ms ({}) must be shorter than response_timeout_ms ({})",
                self.idle_timeout_ms, self.response_timeout_ms
            )));
        }
        if self.baud_rate == 0 {
            return Err(MeterbusError::config("baud_rate must be positive"));
        }
        Ok(())
    }
}

/// Full configuration file: meters plus optional custom register profiles
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusConfig {
    /// Map of meter name -> meter config
    #[serde(default)]
    pub meters: HashMap<String, MeterConfig>,

    /// Custom profiles, looked up before the built-in ones
    #[serde(default)]
    pub profiles: HashMap<String, RegisterProfile>,
}

impl BusConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load config from a file (auto-detect format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> MeterbusResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            MeterbusError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let extension = path.extension().and_then(|s| s.to_str());
        let config = match extension {
            Some("toml") => Self::from_toml(&contents),
            Some("yaml") | Some("yml") => Self::from_yaml(&contents),
            _ => Self::from_yaml(&contents).or_else(|_| Self::from_toml(&contents)),
        }?;
        debug!(path = %path.display(), meters = config.meters.len(), "loaded bus config");
        Ok(config)
    }

    /// Parse config from YAML string
    pub fn from_yaml(contents: &str) -> MeterbusResult<Self> {
        let config: Self = serde_yaml::from_str(contents)
            .map_err(|e| MeterbusError::config(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse config from TOML string
    pub fn from_toml(contents: &str) -> MeterbusResult<Self> {
        let config: Self = toml::from_str(contents)
            .map_err(|e| MeterbusError::config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MeterbusResult<()> {
        for (name, meter) in &self.meters {
            meter
                .validate()
                .map_err(|e| MeterbusError::config(format!("meter '{}': {}", name, e)))?;
        }
        for profile in self.profiles.values() {
            profile.validate().map_err(MeterbusError::Config)?;
        }
        Ok(())
    }

    /// Get a meter config by name
    pub fn get_meter(&self, name: &str) -> MeterbusResult<&MeterConfig> {
        self.meters
            .get(name)
            .ok_or_else(|| MeterbusError::config(format!("Meter '{}' not found in config", name)))
    }

    pub fn add_meter(&mut self, name: &str, config: MeterConfig) {
        self.meters.insert(name.to_string(), config);
    }

    pub fn add_profile(&mut self, profile: RegisterProfile) {
        self.profiles.insert(profile.name.clone(), profile);
    }

    /// Custom profile by name
    pub fn get_profile(&self, name: &str) -> Option<&RegisterProfile> {
        self.profiles.get(name)
    }

    /// All enabled meters, sorted by name
    pub fn enabled_meters(&self) -> Vec<(&str, &MeterConfig)> {
        let mut meters: Vec<_> = self
            .meters
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(n, c)| (n.as_str(), c))
            .collect();
        meters.sort_by(|a, b| a.0.cmp(b.0));
        meters
    }

    /// Standard search paths, in order
    ///
    /// 1. ./meterbus.yaml, ./meterbus.yml, ./meterbus.toml
    /// 2. ~/.meterbus/meterbus.yaml, ~/.meterbus/meterbus.toml
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("meterbus.yaml"),
            PathBuf::from("meterbus.yml"),
            PathBuf::from("meterbus.toml"),
        ];
        if let Some(home) = dirs::home_dir() {
            let dir = home.join(".meterbus");
            paths.push(dir.join("meterbus.yaml"));
            paths.push(dir.join("meterbus.toml"));
        }
        paths
    }

    /// Find and load config from the standard search paths
    pub fn find_and_load() -> MeterbusResult<Self> {
        for path in Self::search_paths() {
            if path.exists() {
                return Self::from_file(&path);
            }
        }
        Err(MeterbusError::config(
            "No meterbus config file found in standard locations",
        ))
    }

    /// Save config to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> MeterbusResult<()> {
        let path = path.as_ref();
        let extension = path.extension().and_then(|s| s.to_str());

        let contents = match extension {
            Some("toml") => toml::to_string_pretty(self)?,
            _ => serde_yaml::to_string(self)?,
        };

        std::fs::write(path, contents).map_err(|e| {
            MeterbusError::config(format!("Failed to write {}: {}", path.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meter_config_defaults() {
        let yaml = r#"
meters:
  mains:
    profile: pzem004t
"#;
        let config = BusConfig::from_yaml(yaml).unwrap();
        let mains = config.get_meter("mains").unwrap();
        assert!(mains.is_simulation());
        assert!(mains.enabled);
        assert_eq!(mains.slave_address, GENERAL_ADDRESS);
        assert_eq!(mains.baud_rate, 9600);
        assert_eq!(mains.response_timeout_ms, 100);
        assert_eq!(mains.write_timeout_ms, 300);
        assert_eq!(mains.idle_timeout_ms, 10);
        assert_eq!(mains.settle_ms, 1);
        assert_eq!(mains.inter_frame_delay_ms, 10);
        assert_eq!(mains.direction_pin, None);
        assert_eq!(mains.sample_time_ms, 0);
    }

    #[test]
    fn test_serial_backend_needs_port() {
        let yaml = r#"
meters:
  broken:
    backend: serial
    profile: pzem004t
"#;
        assert!(BusConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_idle_must_be_shorter_than_response() {
        let mut meter = MeterConfig::simulation("pzem004t");
        meter.idle_timeout_ms = 200;
        assert!(meter.validate().is_err());
    }

    #[test]
    fn test_toml_meters() {
        let toml = r#"
[meters.solar]
backend = "serial"
port = "/dev/ttyAMA0"
profile = "pzem003"
slave_address = 3
direction_pin = 17
"#;
        let config = BusConfig::from_toml(toml).unwrap();
        let solar = config.get_meter("solar").unwrap();
        assert_eq!(solar.port.as_deref(), Some("/dev/ttyAMA0"));
        assert_eq!(solar.slave_address, 3);
        assert_eq!(solar.direction_pin, Some(17));
        assert!(!solar.is_simulation());
    }

    #[test]
    fn test_enabled_meters_sorted() {
        let mut config = BusConfig::new();
        config.add_meter("b", MeterConfig::simulation("pzem004t"));
        config.add_meter("a", MeterConfig::simulation("pzem003"));
        let mut off = MeterConfig::simulation("pzem003");
        off.enabled = false;
        config.add_meter("c", off);

        let names: Vec<&str> = config.enabled_meters().iter().map(|(n, _)| *n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
