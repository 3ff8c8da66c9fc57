//! Switch bridge: MQTT semantics without a network
//!
//! Turns inbound command messages into registry calls and produces the
//! messages the handler has to publish. Keeping this free of the client makes
//! every rule below testable without a broker:
//!
//! - unknown topics are dropped (DEBUG)
//! - payloads other than the configured on/off strings are dropped (WARN)
//! - a state is only published after the pin was actually driven

use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::config::{MqttConfig, SwitchPayloads};
use super::discovery::{DiscoveryPayload, AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE};
use super::message_manager::OutboundMessage;
use super::topics::{availability_topic, TopicMap};
use crate::gpio::{Drift, GpioDriver, PinRegistry, RegistryError, SwitchState};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Failed to serialize discovery payload for '{id}': {source}")]
    Discovery {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// What happened to an inbound message
#[derive(Debug)]
pub enum CommandOutcome {
    /// Pin driven; the state message must be published
    Applied(OutboundMessage),
    UnknownTopic,
    UnknownPayload { id: String },
    Failed(RegistryError),
}

pub struct SwitchBridge<D: GpioDriver> {
    registry: PinRegistry<D>,
    topics: TopicMap,
    payloads: SwitchPayloads,
    availability_topic: String,
    /// Rendered once so every announce sends identical bytes
    discovery: BTreeMap<String, String>,
}

impl<D: GpioDriver> SwitchBridge<D> {
    pub fn new(registry: PinRegistry<D>, config: &MqttConfig) -> Result<Self, BridgeError> {
        let topics = TopicMap::new(
            &config.discovery_prefix,
            registry.switches().map(|(switch, _)| switch.id.as_str()),
        );
        let availability_topic = availability_topic(&config.discovery_prefix, &config.client_id);

        let mut discovery = BTreeMap::new();
        for (switch, _) in registry.switches() {
            // ids in the map come from the registry itself
            let Some(switch_topics) = topics.topics(&switch.id) else {
                continue;
            };
            let json =
                DiscoveryPayload::for_switch(switch, switch_topics, config, &availability_topic)
                    .to_json()
                    .map_err(|source| BridgeError::Discovery {
                        id: switch.id.clone(),
                        source,
                    })?;
            discovery.insert(switch.id.clone(), json);
        }

        Ok(Self {
            registry,
            topics,
            payloads: config.payloads.clone(),
            availability_topic,
            discovery,
        })
    }

    pub fn availability(&self, online: bool) -> OutboundMessage {
        let payload = if online {
            AVAILABILITY_ONLINE
        } else {
            AVAILABILITY_OFFLINE
        };
        OutboundMessage::retained(&self.availability_topic, payload)
    }

    pub fn availability_topic(&self) -> &str {
        &self.availability_topic
    }

    /// Retained discovery documents, one per switch
    pub fn discovery_messages(&self) -> Vec<OutboundMessage> {
        self.discovery
            .iter()
            .filter_map(|(id, json)| {
                self.topics
                    .topics(id)
                    .map(|t| OutboundMessage::retained(&t.config, json.as_str()))
            })
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.topics.command_topics().map(String::from).collect()
    }

    /// Retained current state of every switch
    pub fn state_messages(&self) -> Vec<OutboundMessage> {
        self.registry
            .switches()
            .filter_map(|(switch, state)| self.state_message(&switch.id, state))
            .collect()
    }

    fn state_message(&self, id: &str, state: SwitchState) -> Option<OutboundMessage> {
        self.topics
            .topics(id)
            .map(|t| OutboundMessage::retained(&t.state, self.payloads.render(state)))
    }

    pub fn handle_message(&mut self, topic: &str, payload: &[u8]) -> CommandOutcome {
        let Some(id) = self.topics.resolve_command(topic).map(String::from) else {
            debug!(topic = %topic, "Command for unknown device: {}", String::from_utf8_lossy(payload));
            return CommandOutcome::UnknownTopic;
        };

        let Some(desired) = self.payloads.parse(payload) else {
            warn!(
                switch = %id,
                "Ignoring payload {:?}, expected '{}' or '{}'",
                String::from_utf8_lossy(payload),
                self.payloads.on,
                self.payloads.off
            );
            return CommandOutcome::UnknownPayload { id };
        };

        info!(switch = %id, "Command: {}", desired);
        match self.registry.set_pin(&id, desired) {
            Ok(applied) => match self.state_message(&id, applied) {
                Some(message) => CommandOutcome::Applied(message),
                None => CommandOutcome::Failed(RegistryError::UnknownSwitch(id)),
            },
            Err(e) => {
                error!(switch = %id, "Not confirming state change: {}", e);
                CommandOutcome::Failed(e)
            }
        }
    }

    /// Logs switches whose pin level disagrees with the known state
    pub fn reconcile(&self) -> Vec<Drift> {
        let drift = self.registry.drift();
        for d in &drift {
            warn!(
                switch = %d.id,
                "Pin level drifted: expected {}, observed {}",
                d.expected,
                d.observed
            );
        }
        if drift.is_empty() {
            debug!("All {} pins match their known state", self.registry.len());
        }
        drift
    }

    pub fn registry(&self) -> &PinRegistry<D> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut PinRegistry<D> {
        &mut self.registry
    }

    pub fn switch_count(&self) -> usize {
        self.registry.len()
    }
}
