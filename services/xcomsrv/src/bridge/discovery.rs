//! Home Assistant MQTT discovery metadata.
//!
//! One retained config per sensor under the discovery prefix, published on
//! every broker (re)connection because some deployments recreate the broker
//! and lose previously retained configs.

use serde_json::{json, Value};

use crate::bridge::mqtt::{PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
use crate::config::ParameterDescriptor;

/// Globally unique sensor id derived from the descriptor name.
pub fn unique_id(descriptor: &ParameterDescriptor) -> String {
    format!("xtender_{}", descriptor.name)
}

/// Discovery config topic: `<prefix>/sensor/<unique_id>/config`.
pub fn config_topic(discovery_prefix: &str, descriptor: &ParameterDescriptor) -> String {
    format!("{}/sensor/{}/config", discovery_prefix, unique_id(descriptor))
}

/// Discovery config payload for one sensor.
///
/// Kilo units are re-advertised in base units with a value template so
/// consumers see W/VA; everything else passes the raw unit through.
pub fn config_payload(
    descriptor: &ParameterDescriptor,
    value_topic: &str,
    availability_topic: &str,
) -> Value {
    let uid = unique_id(descriptor);
    let mut config = json!({
        "name": descriptor.display_name,
        "unique_id": uid,
        "object_id": uid,
        "has_entity_name": false,
        "state_topic": value_topic,
        "availability_topic": availability_topic,
        "payload_available": PAYLOAD_ONLINE,
        "payload_not_available": PAYLOAD_OFFLINE,
        "expire_after": 20,
        "device_class": descriptor.device_class,
        "state_class": "measurement",
        // Empty device name keeps the sensors grouped without the device
        // name being prepended to every entity.
        "device": {
            "identifiers": ["studer_xtender"],
            "name": "",
            "manufacturer": "Studer Innotec",
            "model": "Xtender XTM4000-48",
        },
    });

    match descriptor.unit.as_str() {
        "kW" => {
            config["unit_of_measurement"] = json!("W");
            config["value_template"] = json!("{{ value | float * 1000 }}");
        }
        "kVA" => {
            config["unit_of_measurement"] = json!("VA");
            config["value_template"] = json!("{{ value | float * 1000 }}");
        }
        unit => {
            config["unit_of_measurement"] = json!(unit);
        }
    }

    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_parameter_table;

    #[test]
    fn kilo_units_are_scaled_to_base_units() {
        let table = default_parameter_table();
        let kw = table.iter().find(|d| d.unit == "kW").unwrap();
        let config = config_payload(kw, "studer/XT/x", "studer/commstatus");
        assert_eq!(config["unit_of_measurement"], "W");
        assert_eq!(config["value_template"], "{{ value | float * 1000 }}");

        let kva = table.iter().find(|d| d.unit == "kVA").unwrap();
        let config = config_payload(kva, "studer/XT/x", "studer/commstatus");
        assert_eq!(config["unit_of_measurement"], "VA");
    }

    #[test]
    fn plain_units_pass_through() {
        let table = default_parameter_table();
        let volts = table.iter().find(|d| d.unit == "V").unwrap();
        let config = config_payload(volts, "studer/DC/battery_voltage", "studer/commstatus");
        assert_eq!(config["unit_of_measurement"], "V");
        assert!(config.get("value_template").is_none());
    }

    #[test]
    fn config_identifies_the_sensor() {
        let table = default_parameter_table();
        let descriptor = &table[0];
        assert_eq!(unique_id(descriptor), "xtender_xt1_input_active_power");
        assert_eq!(
            config_topic("homeassistant", descriptor),
            "homeassistant/sensor/xtender_xt1_input_active_power/config"
        );

        let config = config_payload(descriptor, "studer/XT/xt1_input_active_power", "studer/commstatus");
        assert_eq!(config["state_topic"], "studer/XT/xt1_input_active_power");
        assert_eq!(config["availability_topic"], "studer/commstatus");
        assert_eq!(config["payload_available"], "online");
        assert_eq!(config["state_class"], "measurement");
    }
}
