//! Home Assistant MQTT discovery payloads
//!
//! One retained JSON document per switch on `<prefix>/switch/<id>/config`.
//! Field order is fixed by the struct layout, so the same config always
//! serializes to the same bytes.

use serde::Serialize;

use super::config::MqttConfig;
use super::topics::SwitchTopics;
use crate::gpio::Switch;

pub const AVAILABILITY_ONLINE: &str = "online";
pub const AVAILABILITY_OFFLINE: &str = "offline";

#[derive(Debug, Serialize)]
struct DeviceInfo<'a> {
    identifiers: [&'a str; 1],
    name: &'a str,
    manufacturer: &'static str,
    model: &'static str,
    sw_version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DiscoveryPayload<'a> {
    name: &'a str,
    unique_id: String,
    object_id: &'a str,
    command_topic: &'a str,
    state_topic: &'a str,
    payload_on: &'a str,
    payload_off: &'a str,
    state_on: &'a str,
    state_off: &'a str,
    availability_topic: &'a str,
    payload_available: &'static str,
    payload_not_available: &'static str,
    optimistic: bool,
    retain: bool,
    qos: u8,
    device: DeviceInfo<'a>,
}

impl<'a> DiscoveryPayload<'a> {
    pub fn for_switch(
        switch: &'a Switch,
        topics: &'a SwitchTopics,
        config: &'a MqttConfig,
        availability_topic: &'a str,
    ) -> Self {
        Self {
            name: &switch.name,
            unique_id: format!("{}_{}", config.client_id, switch.id),
            object_id: &switch.id,
            command_topic: &topics.command,
            state_topic: &topics.state,
            payload_on: &config.payloads.on,
            payload_off: &config.payloads.off,
            state_on: &config.payloads.on,
            state_off: &config.payloads.off,
            availability_topic,
            payload_available: AVAILABILITY_ONLINE,
            payload_not_available: AVAILABILITY_OFFLINE,
            optimistic: false,
            retain: false,
            qos: config.qos_level(),
            device: DeviceInfo {
                identifiers: [config.client_id.as_str()],
                name: &config.client_id,
                manufacturer: "mqttgpio",
                model: "Raspberry Pi GPIO",
                sw_version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mqtt::topics::availability_topic;

    fn render(switch: &Switch, config: &MqttConfig) -> serde_json::Value {
        let topics = SwitchTopics::for_switch(&config.discovery_prefix, &switch.id);
        let availability = availability_topic(&config.discovery_prefix, &config.client_id);
        let json = DiscoveryPayload::for_switch(switch, &topics, config, &availability)
            .to_json()
            .unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_payload_contents() {
        let mut config = MqttConfig::new("localhost");
        config.discovery_prefix = "home".to_string();
        let switch = Switch::new("lamp", 17).named("Living room lamp");

        let value = render(&switch, &config);
        assert_eq!(value["name"], "Living room lamp");
        assert_eq!(value["unique_id"], "mqttgpio_lamp");
        assert_eq!(value["command_topic"], "home/switch/lamp/set");
        assert_eq!(value["state_topic"], "home/switch/lamp/state");
        assert_eq!(value["payload_on"], "ON");
        assert_eq!(value["payload_off"], "OFF");
        assert_eq!(value["state_on"], "ON");
        assert_eq!(value["availability_topic"], "home/mqttgpio/mqttgpio/availability");
        assert_eq!(value["qos"], 2);
        assert_eq!(value["device"]["identifiers"][0], "mqttgpio");
    }

    #[test]
    fn test_serialization_is_stable() {
        let config = MqttConfig::new("localhost");
        let switch = Switch::new("fan", 22);
        let topics = SwitchTopics::for_switch(&config.discovery_prefix, &switch.id);
        let availability = availability_topic(&config.discovery_prefix, &config.client_id);

        let first = DiscoveryPayload::for_switch(&switch, &topics, &config, &availability)
            .to_json()
            .unwrap();
        let second = DiscoveryPayload::for_switch(&switch, &topics, &config, &availability)
            .to_json()
            .unwrap();
        assert_eq!(first, second);
    }
}
