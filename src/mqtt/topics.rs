//! Deterministic topic layout
//!
//! ```text
//! <prefix>/switch/<id>/config   discovery (retained)
//! <prefix>/switch/<id>/set      commands (subscribed)
//! <prefix>/switch/<id>/state    state (retained)
//! <prefix>/mqttgpio/<client_id>/availability
//! ```
//!
//! Switch ids never contain `/`, so each id maps to its own topic subtree.

use std::collections::{BTreeMap, HashMap};

const COMPONENT: &str = "switch";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchTopics {
    pub config: String,
    pub command: String,
    pub state: String,
}

impl SwitchTopics {
    pub fn for_switch(prefix: &str, id: &str) -> Self {
        let base = format!("{}/{}/{}", prefix, COMPONENT, id);
        Self {
            config: format!("{}/config", base),
            command: format!("{}/set", base),
            state: format!("{}/state", base),
        }
    }
}

pub fn availability_topic(prefix: &str, client_id: &str) -> String {
    format!("{}/mqttgpio/{}/availability", prefix, client_id)
}

/// Forward (id → topics) and reverse (command topic → id) lookups
#[derive(Debug, Clone, Default)]
pub struct TopicMap {
    by_switch: BTreeMap<String, SwitchTopics>,
    by_command: HashMap<String, String>,
}

impl TopicMap {
    pub fn new<'a>(prefix: &str, ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut map = TopicMap::default();
        for id in ids {
            let topics = SwitchTopics::for_switch(prefix, id);
            map.by_command.insert(topics.command.clone(), id.to_string());
            map.by_switch.insert(id.to_string(), topics);
        }
        map
    }

    pub fn topics(&self, id: &str) -> Option<&SwitchTopics> {
        self.by_switch.get(id)
    }

    /// Exact reverse of the command topic derivation
    pub fn resolve_command(&self, topic: &str) -> Option<&str> {
        self.by_command.get(topic).map(String::as_str)
    }

    pub fn command_topics(&self) -> impl Iterator<Item = &str> {
        self.by_switch.values().map(|t| t.command.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_topic_layout() {
        let topics = SwitchTopics::for_switch("home", "lamp");
        assert_eq!(topics.config, "home/switch/lamp/config");
        assert_eq!(topics.command, "home/switch/lamp/set");
        assert_eq!(topics.state, "home/switch/lamp/state");
    }

    #[test]
    fn test_topics_never_collide() {
        let mut ids: Vec<String> = vec![
            "lamp", "lamp_2", "lamp-2", "Lamp", "l", "set", "state", "config", "switch",
            "a_b", "ab", "a-b", "_", "-",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        ids.extend((0..64).map(|i| format!("relay_{}", i)));
        ids.extend((0..16).map(|i| "x".repeat(i + 1)));

        let map = TopicMap::new("homeassistant", ids.iter().map(String::as_str));

        let mut seen = HashSet::new();
        for id in &ids {
            let topics = map.topics(id).unwrap();
            for topic in [&topics.config, &topics.command, &topics.state] {
                assert!(seen.insert(topic.clone()), "duplicate topic {}", topic);
            }
        }
        assert_eq!(seen.len(), ids.len() * 3);
    }

    #[test]
    fn test_resolve_command_is_exact_reverse() {
        let map = TopicMap::new("home", ["lamp", "fan"]);
        assert_eq!(map.resolve_command("home/switch/lamp/set"), Some("lamp"));
        assert_eq!(map.resolve_command("home/switch/fan/set"), Some("fan"));
        assert_eq!(map.resolve_command("home/switch/lamp/state"), None);
        assert_eq!(map.resolve_command("home/switch/lamp/set/"), None);
        assert_eq!(map.resolve_command("other/switch/lamp/set"), None);
        assert_eq!(map.resolve_command("$SYS/broker/uptime"), None);
    }

    #[test]
    fn test_command_topics_are_sorted_by_id() {
        let map = TopicMap::new("home", ["zeta", "alpha"]);
        let topics: Vec<&str> = map.command_topics().collect();
        assert_eq!(topics, vec!["home/switch/alpha/set", "home/switch/zeta/set"]);
    }

    #[test]
    fn test_availability_topic() {
        assert_eq!(
            availability_topic("homeassistant", "pi-garage"),
            "homeassistant/mqttgpio/pi-garage/availability"
        );
    }
}
