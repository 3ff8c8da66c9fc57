//! # MQTT Integration Module
//!
//! Connects the pin registry to a broker and announces every switch to
//! Home Assistant via MQTT discovery.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Broker settings, payload strings and defaults
//! ├── topics.rs           - Topic layout and command-topic lookup
//! ├── discovery.rs        - Home Assistant discovery documents
//! ├── message_manager.rs  - Outbound message representation
//! ├── bridge.rs           - Command handling and state publishing, no network
//! ├── backoff.rs          - Reconnect delay schedule
//! └── mqtt_handler.rs     - Connection state machine and event loop
//! ```
//!
//! ## Connection Lifecycle
//!
//! On every (re)connect the handler publishes, in order:
//!
//! 1. `online` on the availability topic
//! 2. one retained discovery document per switch
//! 3. subscriptions to every command topic
//! 4. the retained state of every switch
//!
//! The broker publishes the retained `offline` will if the bridge disappears
//! without a clean disconnect.
//!
//! Everything except the event loop lives in [`bridge::SwitchBridge`], so the
//! command rules are tested without a broker.

pub mod backoff;
pub mod bridge;
pub mod config;
pub mod discovery;
pub mod message_manager;
pub mod mqtt_handler;
pub mod topics;
