use std::fmt;

const PREVIEW_LEN: usize = 48;

/// A publish request produced by the bridge and sent by the handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn retained(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            retain: true,
        }
    }
}

impl fmt::Display for OutboundMessage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let preview: String = self.payload.chars().take(PREVIEW_LEN).collect();
        let ellipsis = if self.payload.chars().count() > PREVIEW_LEN {
            "..."
        } else {
            ""
        };
        write!(f, "{} = {}{}", self.topic, preview, ellipsis)
    }
}
