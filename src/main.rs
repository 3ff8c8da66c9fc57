pub mod config;
pub mod gpio;
pub mod mqtt;

use crate::config::{Config, LogLevel};
use crate::gpio::{open_driver, PinRegistry};
use crate::mqtt::bridge::SwitchBridge;
use crate::mqtt::mqtt_handler::MqttHandler;
use color_eyre::{eyre::eyre, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    setup()?;

    // Logging depends on the file, so config errors go straight to stderr
    let loaded = Config::load_default().map_err(|e| eyre!("Configuration error: {}", e))?;
    setup_logging(loaded.config.log_level);

    info!("Loaded configuration from {}", loaded.path.display());
    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let config = loaded.config;
    let driver = open_driver(config.gpio.backend)
        .map_err(|e| eyre!("Failed to open GPIO: {}", e))?;
    info!("GPIO backend: {}", driver.backend());

    let registry = PinRegistry::new(driver, &config.switches)
        .map_err(|e| eyre!("Failed to set up pins: {}", e))?;
    for (switch, state) in registry.switches() {
        info!(
            "Switch '{}' ({}) on pin {}{} is {}",
            switch.id,
            switch.name,
            switch.pin,
            if switch.inverted { ", inverted" } else { "" },
            state
        );
    }

    let bridge = SwitchBridge::new(registry, &config.mqtt)
        .map_err(|e| eyre!("Failed to prepare discovery: {}", e))?;

    let shutdown = CancellationToken::new();
    spawn_signal_listener(shutdown.clone());

    let stopped = MqttHandler::create(config.mqtt, bridge)
        .start()
        .run_until_shutdown(shutdown)
        .await;

    info!("Shutdown complete ({})", stopped.status());
    Ok(())
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    Ok(())
}

fn setup_logging(level: LogLevel) {
    FmtSubscriber::builder()
        .with_max_level(level.as_tracing())
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .init();
    debug!("Log level set to {}", level);
}

fn spawn_signal_listener(shutdown: CancellationToken) {
    tokio::spawn(async move {
        wait_for_signal().await;
        shutdown.cancel();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
            }
        }
        Err(e) => {
            warn!("Unable to listen for SIGTERM: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down");
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Received Ctrl+C, shutting down");
}
