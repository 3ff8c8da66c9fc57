//! Configuration loading and validation
//!
//! The config file is TOML. Loading is split in two steps so that validation
//! stays a pure function:
//!
//! 1. [`Config::locate`] + [`Config::load`] find and parse the file into a raw
//!    table ([`Config::load_default`] runs both over the standard locations)
//! 2. [`Config::from_table`] turns the raw table into a typed [`Config`] plus the
//!    list of [`ValidationWarning`]s for every default it had to substitute
//!
//! Logging is not set up yet while this runs (the log level lives in the file),
//! so warnings are returned to the caller instead of being logged here.

use std::fmt;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use toml::{Table, Value};
use tracing::Level;

use crate::gpio::{GpioBackend, GpioConfig, Switch, SwitchState};
use crate::mqtt::config::{
    qos_from_level, Credentials, MqttConfig, SwitchPayloads, DEFAULT_CLIENT_ID,
    DEFAULT_DISCOVERY_INTERVAL_SECS, DEFAULT_DISCOVERY_PREFIX, DEFAULT_KEEP_ALIVE_SECS,
    DEFAULT_PAYLOAD_OFF, DEFAULT_PAYLOAD_ON, DEFAULT_PORT, DEFAULT_QOS,
    DEFAULT_RECONNECT_MAX_SECS, DEFAULT_STATE_INTERVAL_SECS,
};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "MQTTGPIO_CONFIG";

/// Searched in order, first existing file wins
pub const CONFIG_FILES: [&str; 3] = [
    "/etc/mqttgpio.conf",
    "./mqttgpio.conf",
    "/opt/mqttgpio/mqttgpio.conf",
];

/// rumqttc asserts a non-zero keep-alive of at least one second
const MIN_KEEP_ALIVE_SECS: u64 = 1;

/// Sent as a 16-bit field in CONNECT
const MAX_KEEP_ALIVE_SECS: u64 = u16::MAX as u64;

/// Upper bound for every timer and the reconnect delay
const MAX_INTERVAL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configuration file found (searched: {searched})")]
    NotFound { searched: String },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing required setting '{0}'")]
    Missing(String),

    #[error("Invalid setting '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error("No switches configured in [switches]")]
    NoSwitches,

    #[error("Pin {pin} is used by both '{first}' and '{second}'")]
    DuplicatePin {
        pin: u8,
        first: String,
        second: String,
    },
}

/// A value that was rejected and replaced by its default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub key: String,
    pub value: String,
    pub fallback: String,
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Configuration file had a misconfigured '{}' setting ({}) - using {}",
            self.key, self.value, self.fallback
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Some(LogLevel::Trace),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warning" | "warn" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    pub fn as_tracing(self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warning => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub log_level: LogLevel,
    pub mqtt: MqttConfig,
    pub gpio: GpioConfig,
    pub switches: Vec<Switch>,
}

/// A parsed config together with where it came from and what was replaced
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub path: PathBuf,
    pub config: Config,
    pub warnings: Vec<ValidationWarning>,
}

impl Config {
    /// Locates, reads and validates the configuration
    pub fn load_default() -> Result<LoadedConfig, ConfigError> {
        let path = Self::locate(&Self::search_paths())?;
        Self::load(&path)
    }

    /// `MQTTGPIO_CONFIG` if set, otherwise the fixed search locations
    pub fn search_paths() -> Vec<PathBuf> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => vec![PathBuf::from(path)],
            None => CONFIG_FILES.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn locate(paths: &[PathBuf]) -> Result<PathBuf, ConfigError> {
        paths
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or_else(|| ConfigError::NotFound {
                searched: paths
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }

    pub fn load(path: &Path) -> Result<LoadedConfig, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: Table = content.parse().map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let (config, warnings) = Self::from_table(&raw)?;
        Ok(LoadedConfig {
            path: path.to_path_buf(),
            config,
            warnings,
        })
    }

    /// Pure conversion from the raw key-value table to a typed config
    pub fn from_table(raw: &Table) -> Result<(Config, Vec<ValidationWarning>), ConfigError> {
        let mut v = Validator::default();

        v.unknown_keys("", raw, &["default", "mqtt", "gpio", "switches"]);

        let default = v.section(raw, "default")?;
        v.unknown_keys("default", default, &["logging"]);
        let log_level = match default.get("logging") {
            None => LogLevel::default(),
            Some(value) => match value.as_str().and_then(LogLevel::parse) {
                Some(level) => level,
                None => {
                    v.warn("default.logging", value, LogLevel::Debug);
                    LogLevel::Debug
                }
            },
        };

        let mqtt = Self::mqtt_section(&mut v, raw)?;

        let gpio_table = v.section(raw, "gpio")?;
        v.unknown_keys("gpio", gpio_table, &["backend"]);
        let backend = match gpio_table.get("backend") {
            None => GpioBackend::default(),
            Some(value) => match value.as_str().and_then(GpioBackend::parse) {
                Some(backend) => backend,
                None => {
                    v.warn("gpio.backend", value, GpioBackend::default());
                    GpioBackend::default()
                }
            },
        };

        let switches = Self::switches_section(&mut v, raw)?;

        let config = Config {
            log_level,
            mqtt,
            gpio: GpioConfig { backend },
            switches,
        };
        Ok((config, v.warnings))
    }

    fn mqtt_section(v: &mut Validator, raw: &Table) -> Result<MqttConfig, ConfigError> {
        let table = match raw.get("mqtt") {
            Some(Value::Table(table)) => table,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "mqtt".to_string(),
                    reason: format!("expected a table, found {}", other.type_str()),
                })
            }
            None => return Err(ConfigError::Missing("mqtt.broker".to_string())),
        };
        v.unknown_keys(
            "mqtt",
            table,
            &[
                "broker",
                "port",
                "username",
                "password",
                "client_id",
                "qos",
                "keep_alive_secs",
                "discovery_prefix",
                "payload_on",
                "payload_off",
                "state_interval_secs",
                "discovery_interval_secs",
                "reconcile_interval_secs",
                "reconnect_max_secs",
            ],
        );

        let broker_host = match table.get("broker").and_then(Value::as_str).map(str::trim) {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ConfigError::Missing("mqtt.broker".to_string())),
        };

        let mut config = MqttConfig::new(broker_host);

        config.broker_port = v
            .integer(table, "mqtt.port", "port", |n| {
                u16::try_from(n).ok().filter(|port| *port != 0)
            })
            .unwrap_or(DEFAULT_PORT);

        config.credentials = match (table.get("username"), table.get("password")) {
            (Some(Value::String(username)), password) if !username.is_empty() => {
                let password = match password {
                    None => String::new(),
                    Some(Value::String(p)) => p.clone(),
                    Some(_) => {
                        v.warn("mqtt.password", &Value::from("<hidden>"), "no password");
                        String::new()
                    }
                };
                Some(Credentials {
                    username: username.clone(),
                    password,
                })
            }
            (Some(other), _) => {
                v.warn("mqtt.username", other, "anonymous login");
                None
            }
            (None, Some(_)) => {
                v.warn("mqtt.password", &Value::from("<hidden>"), "anonymous login (no username)");
                None
            }
            (None, None) => None,
        };

        config.client_id = v
            .string(table, "mqtt.client_id", "client_id", is_topic_segment)
            .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());

        config.qos = v
            .integer(table, "mqtt.qos", "qos", qos_from_level)
            .unwrap_or(DEFAULT_QOS);

        config.keep_alive = v
            .secs(
                table,
                "mqtt.keep_alive_secs",
                "keep_alive_secs",
                MIN_KEEP_ALIVE_SECS..=MAX_KEEP_ALIVE_SECS,
            )
            .unwrap_or(Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS));

        config.discovery_prefix = v
            .string(table, "mqtt.discovery_prefix", "discovery_prefix", |s| {
                let trimmed = s.trim_end_matches('/');
                !trimmed.is_empty() && !trimmed.contains(['+', '#'])
            })
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_DISCOVERY_PREFIX.to_string());

        let on = v.string(table, "mqtt.payload_on", "payload_on", |s| !s.is_empty());
        let off = v.string(table, "mqtt.payload_off", "payload_off", |s| !s.is_empty());
        config.payloads = match (on, off) {
            (Some(on), Some(off)) if on == off => {
                v.warn(
                    "mqtt.payload_off",
                    &Value::from(off),
                    format!("{}/{}", DEFAULT_PAYLOAD_ON, DEFAULT_PAYLOAD_OFF),
                );
                SwitchPayloads::default()
            }
            (on, off) => {
                let on = on.unwrap_or_else(|| DEFAULT_PAYLOAD_ON.to_string());
                let off = off.unwrap_or_else(|| DEFAULT_PAYLOAD_OFF.to_string());
                if on == off {
                    v.warn(
                        "mqtt.payloads",
                        &Value::from(on),
                        format!("{}/{}", DEFAULT_PAYLOAD_ON, DEFAULT_PAYLOAD_OFF),
                    );
                    SwitchPayloads::default()
                } else {
                    SwitchPayloads { on, off }
                }
            }
        };

        let interval = 1..=MAX_INTERVAL_SECS;
        config.state_interval = v
            .secs(table, "mqtt.state_interval_secs", "state_interval_secs", interval.clone())
            .unwrap_or(Duration::from_secs(DEFAULT_STATE_INTERVAL_SECS));
        config.discovery_interval = v
            .secs(
                table,
                "mqtt.discovery_interval_secs",
                "discovery_interval_secs",
                interval.clone(),
            )
            .unwrap_or(Duration::from_secs(DEFAULT_DISCOVERY_INTERVAL_SECS));
        config.reconcile_interval = v.secs(
            table,
            "mqtt.reconcile_interval_secs",
            "reconcile_interval_secs",
            interval.clone(),
        );
        config.reconnect_max = v
            .secs(table, "mqtt.reconnect_max_secs", "reconnect_max_secs", interval)
            .unwrap_or(Duration::from_secs(DEFAULT_RECONNECT_MAX_SECS));

        Ok(config)
    }

    fn switches_section(v: &mut Validator, raw: &Table) -> Result<Vec<Switch>, ConfigError> {
        let table = match raw.get("switches") {
            Some(Value::Table(table)) => table,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "switches".to_string(),
                    reason: format!("expected a table, found {}", other.type_str()),
                })
            }
            None => return Err(ConfigError::NoSwitches),
        };

        let mut switches: Vec<Switch> = Vec::with_capacity(table.len());
        for (id, value) in table {
            if !is_switch_id(id) {
                return Err(ConfigError::Invalid {
                    key: format!("switches.{}", id),
                    reason: "switch ids may only contain letters, digits, '_' and '-'"
                        .to_string(),
                });
            }

            let switch = match value {
                Value::Integer(pin) => Switch::new(id.as_str(), pin_number(id, *pin)?),
                Value::Table(fields) => Self::switch_table(v, id, fields)?,
                other => {
                    return Err(ConfigError::Invalid {
                        key: format!("switches.{}", id),
                        reason: format!(
                            "expected a pin number or a table, found {}",
                            other.type_str()
                        ),
                    })
                }
            };

            if let Some(existing) = switches.iter().find(|s| s.pin == switch.pin) {
                return Err(ConfigError::DuplicatePin {
                    pin: switch.pin,
                    first: existing.id.clone(),
                    second: switch.id,
                });
            }
            switches.push(switch);
        }

        if switches.is_empty() {
            return Err(ConfigError::NoSwitches);
        }
        Ok(switches)
    }

    fn switch_table(v: &mut Validator, id: &str, fields: &Table) -> Result<Switch, ConfigError> {
        let prefix = format!("switches.{}", id);
        v.unknown_keys(&prefix, fields, &["pin", "name", "inverted", "initial_state"]);

        let pin = match fields.get("pin") {
            Some(Value::Integer(pin)) => pin_number(id, *pin)?,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: format!("{}.pin", prefix),
                    reason: format!("expected an integer, found {}", other.type_str()),
                })
            }
            None => return Err(ConfigError::Missing(format!("{}.pin", prefix))),
        };

        let mut switch = Switch::new(id, pin);

        if let Some(name) = v.string(fields, &format!("{}.name", prefix), "name", |s| {
            !s.trim().is_empty()
        }) {
            switch.name = name;
        }

        switch.inverted = match fields.get("inverted") {
            None => false,
            Some(Value::Boolean(inverted)) => *inverted,
            Some(other) => {
                v.warn(&format!("{}.inverted", prefix), other, false);
                false
            }
        };

        switch.initial_state = match fields.get("initial_state") {
            None => SwitchState::Off,
            Some(Value::Boolean(on)) => SwitchState::from(*on),
            Some(Value::String(s)) => match s.to_ascii_lowercase().as_str() {
                "on" | "true" => SwitchState::On,
                "off" | "false" => SwitchState::Off,
                _ => {
                    v.warn(
                        &format!("{}.initial_state", prefix),
                        &Value::from(s.as_str()),
                        SwitchState::Off,
                    );
                    SwitchState::Off
                }
            },
            Some(other) => {
                v.warn(&format!("{}.initial_state", prefix), other, SwitchState::Off);
                SwitchState::Off
            }
        };

        Ok(switch)
    }
}

fn pin_number(id: &str, pin: i64) -> Result<u8, ConfigError> {
    u8::try_from(pin).map_err(|_| ConfigError::Invalid {
        key: format!("switches.{}.pin", id),
        reason: format!("{} is not a valid BCM pin number", pin),
    })
}

/// Home Assistant object ids and single topic levels
fn is_switch_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_topic_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '+', '#'])
}

/// Collects warnings while reading optional values
#[derive(Default)]
struct Validator {
    warnings: Vec<ValidationWarning>,
}

impl Validator {
    fn warn(&mut self, key: &str, value: &Value, fallback: impl fmt::Display) {
        self.warnings.push(ValidationWarning {
            key: key.to_string(),
            value: value.to_string(),
            fallback: fallback.to_string(),
        });
    }

    /// Optional sub-table; absent means empty
    fn section<'a>(&mut self, raw: &'a Table, name: &str) -> Result<&'a Table, ConfigError> {
        static EMPTY: std::sync::OnceLock<Table> = std::sync::OnceLock::new();
        match raw.get(name) {
            None => Ok(EMPTY.get_or_init(Table::new)),
            Some(Value::Table(table)) => Ok(table),
            Some(other) => Err(ConfigError::Invalid {
                key: name.to_string(),
                reason: format!("expected a table, found {}", other.type_str()),
            }),
        }
    }

    fn unknown_keys(&mut self, section: &str, table: &Table, known: &[&str]) {
        for key in table.keys().filter(|k| !known.contains(&k.as_str())) {
            let full = if section.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", section, key)
            };
            self.warnings.push(ValidationWarning {
                key: full,
                value: "unknown key".to_string(),
                fallback: "nothing (ignored)".to_string(),
            });
        }
    }

    fn integer<T>(
        &mut self,
        table: &Table,
        key: &str,
        field: &str,
        convert: impl Fn(i64) -> Option<T>,
    ) -> Option<T> {
        let value = table.get(field)?;
        match value.as_integer().and_then(&convert) {
            Some(converted) => Some(converted),
            None => {
                self.warn(key, value, "the default");
                None
            }
        }
    }

    fn secs(
        &mut self,
        table: &Table,
        key: &str,
        field: &str,
        range: RangeInclusive<u64>,
    ) -> Option<Duration> {
        let value = table.get(field)?;
        match value.as_integer().and_then(|n| u64::try_from(n).ok()) {
            Some(secs) if range.contains(&secs) => Some(Duration::from_secs(secs)),
            _ => {
                self.warn(key, value, "the default");
                None
            }
        }
    }

    fn string(
        &mut self,
        table: &Table,
        key: &str,
        field: &str,
        valid: impl Fn(&str) -> bool,
    ) -> Option<String> {
        let value = table.get(field)?;
        match value.as_str().filter(|s| valid(s)) {
            Some(s) => Some(s.to_string()),
            None => {
                self.warn(key, value, "the default");
                None
            }
        }
    }
}
