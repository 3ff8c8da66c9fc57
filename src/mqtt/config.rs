use rumqttc::QoS;
use std::time::Duration;

use crate::gpio::SwitchState;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_CLIENT_ID: &str = "mqttgpio";
pub const DEFAULT_QOS: QoS = QoS::ExactlyOnce;
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_PAYLOAD_ON: &str = "ON";
pub const DEFAULT_PAYLOAD_OFF: &str = "OFF";
pub const DEFAULT_STATE_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_DISCOVERY_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_RECONNECT_MAX_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// The two payload strings shared by command and state topics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchPayloads {
    pub on: String,
    pub off: String,
}

impl SwitchPayloads {
    /// Exact match only; anything else is not a command
    pub fn parse(&self, payload: &[u8]) -> Option<SwitchState> {
        if payload == self.on.as_bytes() {
            Some(SwitchState::On)
        } else if payload == self.off.as_bytes() {
            Some(SwitchState::Off)
        } else {
            None
        }
    }

    pub fn render(&self, state: SwitchState) -> &str {
        match state {
            SwitchState::On => &self.on,
            SwitchState::Off => &self.off,
        }
    }
}

impl Default for SwitchPayloads {
    fn default() -> Self {
        Self {
            on: DEFAULT_PAYLOAD_ON.to_string(),
            off: DEFAULT_PAYLOAD_OFF.to_string(),
        }
    }
}

/// Broker connection and topic layout
#[derive(Debug, Clone, PartialEq)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub credentials: Option<Credentials>,
    pub client_id: String,
    pub qos: QoS,
    pub keep_alive: Duration,
    pub discovery_prefix: String,
    pub payloads: SwitchPayloads,
    /// State heartbeat period
    pub state_interval: Duration,
    /// Discovery re-announce period
    pub discovery_interval: Duration,
    /// Pin read-back period; `None` disables it
    pub reconcile_interval: Option<Duration>,
    /// Upper bound for the reconnect backoff
    pub reconnect_max: Duration,
}

impl MqttConfig {
    /// Defaults for everything but the broker host
    pub fn new(broker_host: impl Into<String>) -> Self {
        Self {
            broker_host: broker_host.into(),
            broker_port: DEFAULT_PORT,
            credentials: None,
            client_id: DEFAULT_CLIENT_ID.to_string(),
            qos: DEFAULT_QOS,
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            payloads: SwitchPayloads::default(),
            state_interval: Duration::from_secs(DEFAULT_STATE_INTERVAL_SECS),
            discovery_interval: Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS),
            reconcile_interval: None,
            reconnect_max: Duration::from_secs(DEFAULT_RECONNECT_MAX_SECS),
        }
    }

    pub fn qos_level(&self) -> u8 {
        match self.qos {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

pub fn qos_from_level(level: i64) -> Option<QoS> {
    match level {
        0 => Some(QoS::AtMostOnce),
        1 => Some(QoS::AtLeastOnce),
        2 => Some(QoS::ExactlyOnce),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_parse_is_exact() {
        let payloads = SwitchPayloads::default();
        assert_eq!(payloads.parse(b"ON"), Some(SwitchState::On));
        assert_eq!(payloads.parse(b"OFF"), Some(SwitchState::Off));
        assert_eq!(payloads.parse(b"on"), None);
        assert_eq!(payloads.parse(b"ON "), None);
        assert_eq!(payloads.parse(b""), None);
    }

    #[test]
    fn test_custom_payloads_render() {
        let payloads = SwitchPayloads {
            on: "1".to_string(),
            off: "0".to_string(),
        };
        assert_eq!(payloads.render(SwitchState::On), "1");
        assert_eq!(payloads.render(SwitchState::Off), "0");
        assert_eq!(payloads.parse(b"1"), Some(SwitchState::On));
    }

    #[test]
    fn test_qos_roundtrip() {
        for level in 0..=2 {
            let mut config = MqttConfig::new("localhost");
            config.qos = qos_from_level(level).unwrap();
            assert_eq!(config.qos_level() as i64, level);
        }
        assert_eq!(qos_from_level(3), None);
    }
}
