//! Broker connection handler with statum lifecycle
//!
//! ```text
//! Initializing ──► Running ──► Stopped
//! ```
//!
//! `Running` drives one `select!` loop over the rumqttc event loop, the
//! periodic timers and the shutdown token. Inside it the connection itself
//! cycles through [`ConnectionState`]:
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──► Reconnecting
//! ```
//!
//! Every entry into `Connected` replays availability, discovery, subscribe
//! and state publishing.

use chrono::{DateTime, Local};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet};
use statum::{machine, state};
use std::fmt;
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::bridge::{CommandOutcome, SwitchBridge};
use super::config::MqttConfig;
use super::discovery::AVAILABILITY_OFFLINE;
use super::message_manager::OutboundMessage;
use crate::gpio::GpioDriver;

/// Time allowed for the offline message and DISCONNECT to leave on shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

const MIN_REQUEST_CAPACITY: usize = 64;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct MQTTStatus {
    pub connection_state: ConnectionState,
    pub connects: usize,
    pub commands_handled: usize,
    pub commands_rejected: usize,
    pub messages_sent: usize,
    pub errors: usize,
    pub last_error: Option<String>,
    pub last_activity: Option<DateTime<Local>>,
}

impl MQTTStatus {
    fn touch(&mut self) {
        self.last_activity = Some(Local::now());
    }

    fn record_error(&mut self, message: String) {
        self.errors += 1;
        self.last_error = Some(message);
    }
}

impl fmt::Display for MQTTStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "state={} connects={} commands={} rejected={} sent={} errors={}",
            self.connection_state,
            self.connects,
            self.commands_handled,
            self.commands_rejected,
            self.messages_sent,
            self.errors
        )?;
        if let Some(at) = self.last_activity {
            write!(f, " last_activity={}", at.format("%Y-%m-%d %H:%M:%S"))?;
        }
        Ok(())
    }
}

#[state]
#[derive(Debug, Clone)]
pub enum HandlerState {
    Initializing, // client built, nothing sent yet
    Running,      // event loop active
    Stopped,      // disconnected after shutdown
}

#[machine]
pub struct MqttHandler<S: HandlerState> {
    config: MqttConfig,
    bridge: SwitchBridge<Box<dyn GpioDriver>>,
    client: AsyncClient,
    eventloop: EventLoop,
    status: MQTTStatus,
    backoff: Backoff,
}

impl<S: HandlerState> MqttHandler<S> {
    pub fn status(&self) -> &MQTTStatus {
        &self.status
    }

    pub fn bridge(&self) -> &SwitchBridge<Box<dyn GpioDriver>> {
        &self.bridge
    }
}

impl MqttHandler<Initializing> {
    pub fn create(config: MqttConfig, bridge: SwitchBridge<Box<dyn GpioDriver>>) -> Self {
        let mut options = MqttOptions::new(
            config.client_id.clone(),
            config.broker_host.clone(),
            config.broker_port,
        );
        options
            .set_keep_alive(config.keep_alive)
            .set_clean_session(true)
            .set_last_will(LastWill::new(
                bridge.availability_topic(),
                AVAILABILITY_OFFLINE.as_bytes().to_vec(),
                config.qos,
                true,
            ));
        if let Some(credentials) = &config.credentials {
            options.set_credentials(credentials.username.clone(), credentials.password.clone());
        }

        // one connect replays availability + discovery + subscribe + state per switch
        let capacity = (bridge.switch_count() * 4 + 8).max(MIN_REQUEST_CAPACITY);
        let (client, eventloop) = AsyncClient::new(options, capacity);

        debug!(
            "MQTT client '{}' created for mqtt://{}:{}",
            config.client_id, config.broker_host, config.broker_port
        );

        let backoff = Backoff::new(Duration::from_secs(1), config.reconnect_max, 2.0);

        Self::new(
            config,
            bridge,
            client,
            eventloop,
            MQTTStatus::default(),
            backoff,
        )
    }

    pub fn start(mut self) -> MqttHandler<Running> {
        info!(
            "Connecting to mqtt://{}:{}",
            self.config.broker_host, self.config.broker_port
        );
        self.status.connection_state = ConnectionState::Connecting;
        self.transition()
    }
}

impl MqttHandler<Running> {
    /// Runs the event loop until `shutdown` is cancelled, then disconnects
    pub async fn run_until_shutdown(mut self, shutdown: CancellationToken) -> MqttHandler<Stopped> {
        let mut state_tick = periodic(self.config.state_interval);
        let mut discovery_tick = periodic(self.config.discovery_interval);
        let mut reconcile_tick = self.config.reconcile_interval.map(periodic);

        info!("Starting the main loop");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                event = self.eventloop.poll() => {
                    match event {
                        Ok(event) => self.handle_event(event),
                        Err(e) => self.handle_connection_error(e, &shutdown).await,
                    }
                }
                _ = state_tick.tick() => self.on_state_tick(),
                _ = discovery_tick.tick() => self.on_discovery_tick(),
                _ = next_tick(&mut reconcile_tick) => {
                    self.on_reconcile_tick();
                }
            }
        }

        self.disconnect().await;
        self.transition()
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) => {
                info!(
                    "Connected to mqtt://{}:{} (session present: {})",
                    self.config.broker_host, self.config.broker_port, ack.session_present
                );
                self.on_connected();
            }
            Event::Incoming(Packet::Publish(publish)) => {
                self.status.touch();
                self.on_publish(&publish.topic, &publish.payload);
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                debug!("Subscription acknowledged (pkid {})", ack.pkid);
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Broker closed the session");
                self.status.connection_state = ConnectionState::Reconnecting;
            }
            Event::Incoming(_) | Event::Outgoing(_) => {}
        }
    }

    fn on_connected(&mut self) {
        self.status.connection_state = ConnectionState::Connected;
        self.status.connects += 1;
        self.status.touch();
        self.backoff.reset();

        self.publish(self.bridge.availability(true));
        self.publish_all(self.bridge.discovery_messages());

        for topic in self.bridge.subscriptions() {
            match self.client.try_subscribe(topic.as_str(), self.config.qos) {
                Ok(()) => debug!("Subscribed to {}", topic),
                Err(e) => {
                    error!("Failed to subscribe to {}: {}", topic, e);
                    self.status.record_error(e.to_string());
                }
            }
        }

        self.publish_all(self.bridge.state_messages());
    }

    fn on_publish(&mut self, topic: &str, payload: &[u8]) {
        match self.bridge.handle_message(topic, payload) {
            CommandOutcome::Applied(state) => {
                self.status.commands_handled += 1;
                self.publish(state);
            }
            CommandOutcome::UnknownTopic => {}
            CommandOutcome::UnknownPayload { .. } => self.status.commands_rejected += 1,
            CommandOutcome::Failed(e) => {
                self.status.commands_rejected += 1;
                self.status.record_error(e.to_string());
            }
        }
    }

    fn on_state_tick(&mut self) {
        debug!("State heartbeat");
        self.publish_all(self.bridge.state_messages());
    }

    fn on_discovery_tick(&mut self) {
        debug!("Re-announcing discovery");
        self.publish_all(self.bridge.discovery_messages());
    }

    /// Number of drifted switches
    fn on_reconcile_tick(&self) -> usize {
        self.bridge.reconcile().len()
    }

    async fn handle_connection_error(
        &mut self,
        e: rumqttc::ConnectionError,
        shutdown: &CancellationToken,
    ) {
        let delay = self.backoff.next_sleep();
        if self.status.connection_state == ConnectionState::Connected {
            warn!("Lost connection to broker: {}", e);
        } else {
            warn!(
                "Unable to connect to mqtt://{}:{} ({}), attempt {}",
                self.config.broker_host,
                self.config.broker_port,
                e,
                self.backoff.attempt()
            );
        }
        self.status.connection_state = ConnectionState::Reconnecting;
        self.status.record_error(e.to_string());

        info!("Reconnecting in {:.1}s", delay.as_secs_f64());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    fn publish_all(&mut self, messages: Vec<OutboundMessage>) {
        for message in messages {
            self.publish(message);
        }
    }

    fn publish(&mut self, message: OutboundMessage) {
        if self.status.connection_state != ConnectionState::Connected {
            debug!("Not connected, dropping {}", message);
            return;
        }
        debug!("publish {}", message);
        match self.client.try_publish(
            message.topic.as_str(),
            self.config.qos,
            message.retain,
            message.payload.into_bytes(),
        ) {
            Ok(()) => self.status.messages_sent += 1,
            Err(e) => {
                error!("Failed to queue publish to {}: {}", message.topic, e);
                self.status.record_error(e.to_string());
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.status.connection_state == ConnectionState::Connected {
            self.publish(self.bridge.availability(false));
        }
        if let Err(e) = self.client.try_disconnect() {
            warn!("Failed to queue DISCONNECT: {}", e);
        }

        let eventloop = &mut self.eventloop;
        let drain = async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Broker did not acknowledge shutdown within {:?}", SHUTDOWN_GRACE);
        }

        self.status.connection_state = ConnectionState::Disconnected;
        info!("Disconnected from broker");
    }
}

/// Timer whose first tick is one full period away
fn periodic(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::{MockDriver, PinRegistry, Switch};

    fn handler(config: MqttConfig) -> MqttHandler<Initializing> {
        handler_with(config, &[Switch::new("lamp", 17)])
    }

    fn handler_with(config: MqttConfig, switches: &[Switch]) -> MqttHandler<Initializing> {
        let driver: Box<dyn GpioDriver> = Box::new(MockDriver::new());
        let registry = PinRegistry::new(driver, switches).unwrap();
        let bridge = SwitchBridge::new(registry, &config).unwrap();
        MqttHandler::create(config, bridge)
    }

    fn unreachable_config() -> MqttConfig {
        // port 1 on loopback refuses immediately
        let mut config = MqttConfig::new("127.0.0.1");
        config.broker_port = 1;
        config.reconnect_max = Duration::from_millis(50);
        config
    }

    #[test]
    fn test_status_display() {
        let status = MQTTStatus {
            connection_state: ConnectionState::Connected,
            connects: 2,
            commands_handled: 5,
            ..MQTTStatus::default()
        };
        let rendered = status.to_string();
        assert!(rendered.contains("state=connected"));
        assert!(rendered.contains("connects=2"));
        assert!(rendered.contains("commands=5"));
    }

    #[tokio::test]
    async fn test_start_enters_connecting() {
        let running = handler(unreachable_config()).start();
        assert_eq!(running.status().connection_state, ConnectionState::Connecting);
        assert_eq!(running.bridge().switch_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_is_dropped_while_not_connected() {
        let mut running = handler(unreachable_config()).start();
        running.publish(OutboundMessage::retained("home/switch/lamp/state", "ON"));
        assert_eq!(running.status().messages_sent, 0);
    }

    #[tokio::test]
    async fn test_connect_sequence_queues_everything() {
        let mut running = handler(unreachable_config()).start();
        running.on_connected();

        // availability + discovery + state for one switch
        assert_eq!(running.status().messages_sent, 3);
        assert_eq!(running.status().connects, 1);
        assert_eq!(running.status().connection_state, ConnectionState::Connected);

        // reconnect replays the same sequence
        running.on_connected();
        assert_eq!(running.status().messages_sent, 6);
        assert_eq!(running.status().connects, 2);
    }

    fn two_switches() -> [Switch; 2] {
        [Switch::new("lamp", 17), Switch::new("fan", 22)]
    }

    #[tokio::test]
    async fn test_state_heartbeat_publishes_every_switch() {
        let mut running = handler_with(unreachable_config(), &two_switches()).start();
        running.on_connected();
        let sent = running.status().messages_sent;

        running.on_state_tick();
        assert_eq!(running.status().messages_sent, sent + 2);
    }

    #[tokio::test]
    async fn test_discovery_reannounce_publishes_every_switch() {
        let mut running = handler_with(unreachable_config(), &two_switches()).start();
        running.on_connected();
        let sent = running.status().messages_sent;

        running.on_discovery_tick();
        assert_eq!(running.status().messages_sent, sent + 2);
    }

    #[tokio::test]
    async fn test_ticks_queue_nothing_while_disconnected() {
        let mut running = handler_with(unreachable_config(), &two_switches()).start();

        running.on_state_tick();
        running.on_discovery_tick();
        assert_eq!(running.status().messages_sent, 0);
        assert_eq!(running.status().errors, 0);
    }

    #[tokio::test]
    async fn test_reconcile_tick_publishes_nothing() {
        let mut running = handler_with(unreachable_config(), &two_switches()).start();
        running.on_connected();
        let sent = running.status().messages_sent;

        assert_eq!(running.on_reconcile_tick(), 0);
        assert_eq!(running.status().messages_sent, sent);
    }

    #[tokio::test]
    async fn test_command_publishes_state() {
        let mut running = handler(unreachable_config()).start();
        running.on_connected();
        let sent = running.status().messages_sent;

        running.on_publish("homeassistant/switch/lamp/set", b"ON");
        assert_eq!(running.status().commands_handled, 1);
        assert_eq!(running.status().messages_sent, sent + 1);

        running.on_publish("homeassistant/switch/lamp/set", b"maybe");
        assert_eq!(running.status().commands_rejected, 1);
        assert_eq!(running.status().messages_sent, sent + 1);
    }

    #[tokio::test]
    async fn test_shutdown_without_broker() {
        let running = handler(unreachable_config()).start();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let stopped = tokio::time::timeout(
            Duration::from_secs(10),
            running.run_until_shutdown(shutdown),
        )
        .await
        .expect("handler did not stop");

        assert_eq!(stopped.status().connection_state, ConnectionState::Disconnected);
        assert!(stopped.status().errors >= 1);
        assert_eq!(stopped.status().connects, 0);
    }
}
