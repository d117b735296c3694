//! Availability & publish bridge
//!
//! Maps transaction outcomes onto the MQTT topic space, tracks serial-link
//! liveness with debounced retained markers, and announces Home Assistant
//! discovery metadata whenever the broker connection is (re)established.

mod availability;
mod discovery;
mod mqtt;

pub use availability::LinkAvailability;
pub use discovery::{config_payload, config_topic, unique_id};
pub use mqtt::{plan_outcome, MqttBridge, OutcomePlan, FAILURE_SENTINEL, PAYLOAD_OFFLINE, PAYLOAD_ONLINE};
