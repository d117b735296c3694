//! Service configuration
//!
//! YAML-loadable configuration with defaults reproducing the original
//! deployment: an Xcom-232 gateway at 115200 8E1 and the full Xtender
//! parameter table. The descriptor table is immutable after startup; the
//! scheduler owns it and shares it by reference with the publish bridge.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scheduler::PollStrategy;
use crate::transport::SerialConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One polled parameter. Immutable after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Protocol object id of the user-information value
    pub parameter_id: u32,
    /// Target device or multicast group address
    pub device_address: u32,
    /// Stable machine id, unique across the table
    pub name: String,
    /// Human-readable name used in discovery metadata
    pub display_name: String,
    /// Topic group between the root and the name ("XT", "AC", "DC")
    pub topic_segment: String,
    /// Raw unit as reported by the device
    pub unit: String,
    /// ±1, applied to the raw value before publishing
    #[serde(default = "default_sign")]
    pub sign: f32,
    /// Extra multiplier applied before publishing
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Semantic tag for downstream discovery ("power", "voltage", ...)
    pub device_class: String,
}

fn default_sign() -> f32 {
    1.0
}

fn default_scale() -> f32 {
    1.0
}

/// Poll pacing and strategy selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub strategy: PollStrategy,
    /// Delay between descriptors within a sweep, to avoid overwhelming the
    /// device's command processor
    pub param_delay_ms: u64,
    /// Idle time after a completed sweep
    pub cycle_delay_ms: u64,
    /// Minimum interval between round-robin invocations
    pub tick_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            strategy: PollStrategy::Sweep,
            param_delay_ms: 10,
            cycle_delay_ms: 100,
            tick_interval_ms: 500,
        }
    }
}

/// MQTT broker connection and topic layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Root of the value topic space
    pub topic_root: String,
    /// Home Assistant discovery prefix
    pub discovery_prefix: String,
    pub keep_alive_secs: u64,
    /// Automatic backoff between reconnect attempts after a broker error
    pub reconnect_backoff_secs: u64,
    /// Interval of the connection health check run from the poll loop
    pub health_check_interval_secs: u64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "xcomsrv".to_string(),
            username: None,
            password: None,
            topic_root: "studer".to_string(),
            discovery_prefix: "homeassistant".to_string(),
            keep_alive_secs: 60,
            reconnect_backoff_secs: 5,
            health_check_interval_secs: 60,
        }
    }
}

impl MqttConfig {
    /// Retained liveness topic, also used as the last-will topic.
    pub fn availability_topic(&self) -> String {
        format!("{}/commstatus", self.topic_root)
    }

    pub fn value_topic(&self, descriptor: &ParameterDescriptor) -> String {
        format!(
            "{}/{}/{}",
            self.topic_root, descriptor.topic_segment, descriptor.name
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("mqtt host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid("mqtt port cannot be zero".to_string()));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Invalid("mqtt client id cannot be empty".to_string()));
        }
        if self.topic_root.is_empty() {
            return Err(ConfigError::Invalid("mqtt topic root cannot be empty".to_string()));
        }
        Ok(())
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttConfig,
    pub poll: PollConfig,
    pub parameters: Vec<ParameterDescriptor>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            mqtt: MqttConfig::default(),
            poll: PollConfig::default(),
            parameters: default_parameter_table(),
        }
    }
}

impl AppConfig {
    /// Load from a YAML file, or fall back to the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
                    path: path.display().to_string(),
                    source,
                })?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.serial
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        self.mqtt.validate()?;

        if self.parameters.is_empty() {
            return Err(ConfigError::Invalid("parameter table is empty".to_string()));
        }
        let mut names = HashSet::new();
        for descriptor in &self.parameters {
            if descriptor.name.is_empty() {
                return Err(ConfigError::Invalid("parameter name cannot be empty".to_string()));
            }
            if !names.insert(descriptor.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate parameter name: {}",
                    descriptor.name
                )));
            }
            if descriptor.topic_segment.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "parameter {} has an empty topic segment",
                    descriptor.name
                )));
            }
            if descriptor.parameter_id == 0 {
                return Err(ConfigError::Invalid(format!(
                    "parameter {} has object id 0",
                    descriptor.name
                )));
            }
            if descriptor.sign != 1.0 && descriptor.sign != -1.0 {
                return Err(ConfigError::Invalid(format!(
                    "parameter {} has sign {} (must be 1 or -1)",
                    descriptor.name, descriptor.sign
                )));
            }
        }
        Ok(())
    }
}

fn descriptor(
    parameter_id: u32,
    device_address: u32,
    name: &str,
    display_name: &str,
    topic_segment: &str,
    unit: &str,
    sign: f32,
    device_class: &str,
) -> ParameterDescriptor {
    ParameterDescriptor {
        parameter_id,
        device_address,
        name: name.to_string(),
        display_name: display_name.to_string(),
        topic_segment: topic_segment.to_string(),
        unit: unit.to_string(),
        sign,
        scale: 1.0,
        device_class: device_class.to_string(),
    }
}

/// The stock Xtender installation table: four inverters (101-104), three
/// phases (191-193) and the system aggregates at the multicast address 100.
pub fn default_parameter_table() -> Vec<ParameterDescriptor> {
    vec![
        descriptor(3137, 101, "xt1_input_active_power", "XT1 input active power", "XT", "kW", -1.0, "power"),
        descriptor(3138, 101, "xt1_input_apparent_power", "XT1 input apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 101, "xt1_output_active_power", "XT1 output active power", "XT", "kW", -1.0, "power"),
        descriptor(3139, 101, "xt1_output_apparent_power", "XT1 output apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 102, "xt2_input_active_power", "XT2 input active power", "XT", "kW", -1.0, "power"),
        descriptor(3138, 102, "xt2_input_apparent_power", "XT2 input apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 102, "xt2_output_active_power", "XT2 output active power", "XT", "kW", -1.0, "power"),
        descriptor(3139, 102, "xt2_output_apparent_power", "XT2 output apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 103, "xt3_input_active_power", "XT3 input active power", "XT", "kW", -1.0, "power"),
        descriptor(3138, 103, "xt3_input_apparent_power", "XT3 input apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 103, "xt3_output_active_power", "XT3 output active power", "XT", "kW", -1.0, "power"),
        descriptor(3139, 103, "xt3_output_apparent_power", "XT3 output apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 104, "xt4_input_active_power", "XT4 input active power", "XT", "kW", -1.0, "power"),
        descriptor(3138, 104, "xt4_input_apparent_power", "XT4 input apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 104, "xt4_output_active_power", "XT4 output active power", "XT", "kW", -1.0, "power"),
        descriptor(3139, 104, "xt4_output_apparent_power", "XT4 output apparent power", "XT", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 191, "l1_input_active_power", "L1 input active power", "AC", "kW", -1.0, "power"),
        descriptor(3138, 191, "l1_input_apparent_power", "L1 input apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 191, "l1_output_active_power", "L1 output active power", "AC", "kW", -1.0, "power"),
        descriptor(3139, 191, "l1_output_apparent_power", "L1 output apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 192, "l2_input_active_power", "L2 input active power", "AC", "kW", -1.0, "power"),
        descriptor(3138, 192, "l2_input_apparent_power", "L2 input apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 192, "l2_output_active_power", "L2 output active power", "AC", "kW", -1.0, "power"),
        descriptor(3139, 192, "l2_output_apparent_power", "L2 output apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3137, 193, "l3_input_active_power", "L3 input active power", "AC", "kW", -1.0, "power"),
        descriptor(3138, 193, "l3_input_apparent_power", "L3 input apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3136, 193, "l3_output_active_power", "L3 output active power", "AC", "kW", -1.0, "power"),
        descriptor(3139, 193, "l3_output_apparent_power", "L3 output apparent power", "AC", "kVA", 1.0, "apparent_power"),
        descriptor(3104, 101, "xt1_temperature", "XT1 temperature", "XT", "°C", 1.0, "temperature"),
        descriptor(3104, 102, "xt2_temperature", "XT2 temperature", "XT", "°C", 1.0, "temperature"),
        descriptor(3104, 103, "xt3_temperature", "XT3 temperature", "XT", "°C", 1.0, "temperature"),
        descriptor(3104, 104, "xt4_temperature", "XT4 temperature", "XT", "°C", 1.0, "temperature"),
        descriptor(3085, 100, "output_freq", "AC output frequency", "AC", "Hz", 1.0, "frequency"),
        descriptor(3137, 100, "total_input_active_power", "Total input active power", "AC", "kW", -1.0, "power"),
        descriptor(3136, 100, "total_output_active_power", "Total output active power", "AC", "kW", -1.0, "power"),
        descriptor(3000, 100, "battery_voltage", "Battery voltage", "DC", "V", 1.0, "voltage"),
        descriptor(3005, 191, "l1_batt_current", "L1 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 192, "l2_batt_current", "L2 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 193, "l3_batt_current", "L3 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 101, "xt1_batt_current", "XT1 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 102, "xt2_batt_current", "XT2 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 103, "xt3_batt_current", "XT3 battery current", "DC", "A", 1.0, "current"),
        descriptor(3005, 104, "xt4_batt_current", "XT4 battery current", "DC", "A", 1.0, "current"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.parameters.len(), 44);
    }

    #[test]
    fn duplicate_parameter_names_are_rejected() {
        let mut config = AppConfig::default();
        let clone = config.parameters[0].clone();
        config.parameters.push(clone);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_sign_is_rejected() {
        let mut config = AppConfig::default();
        config.parameters[0].sign = 0.5;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn partial_yaml_fills_in_defaults() {
        let yaml = r#"
serial:
  device: /dev/ttyUSB0
mqtt:
  host: broker.lan
poll:
  strategy: round_robin
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.serial.device, "/dev/ttyUSB0");
        assert_eq!(config.serial.baud_rate, 115_200);
        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.topic_root, "studer");
        assert_eq!(config.poll.strategy, crate::scheduler::PollStrategy::RoundRobin);
        assert_eq!(config.parameters.len(), 44);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn topics_follow_the_layout() {
        let mqtt = MqttConfig::default();
        let table = default_parameter_table();
        assert_eq!(mqtt.availability_topic(), "studer/commstatus");
        assert_eq!(
            mqtt.value_topic(&table[0]),
            "studer/XT/xt1_input_active_power"
        );
    }
}
