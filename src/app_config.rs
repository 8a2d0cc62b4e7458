use crate::dispatcher::WorkerSettings;
use crate::domain::DataPoints;
use crate::effects::EffectDefaults;
use crate::tuya::{ConnectSettings, LocalKey, ProtocolVersion, SessionConfig};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    core: Core,
    device: Device,
    #[serde(default)]
    data_points: DataPoints,
    #[serde(default)]
    effects: EffectDefaults,
    #[serde(default)]
    api: Api,
    #[serde(default)]
    key_store: KeyStore,
}

impl AppConfig {
    /// Reads `config.*`, then `config_local.*` if present, then `LAMPD__SECTION__KEY` environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(
                config::Environment::with_prefix("LAMPD")
                    .prefix_separator("__")
                    .separator("__"),
            );
        AppConfig::build(builder)
    }

    fn build(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        builder.build()?.try_deserialize()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn data_points(&self) -> DataPoints {
        self.data_points
    }

    pub fn effects(&self) -> EffectDefaults {
        self.effects
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn key_store(&self) -> &KeyStore {
        &self.key_store
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    log_level: String,
}

impl Default for Core {
    fn default() -> Self {
        Core {
            log_level: "info".to_string(),
        }
    }
}

impl Core {
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

#[derive(Debug, Deserialize)]
pub struct Device {
    #[serde(default = "default_name")]
    name: String,
    id: String,
    address: String,
    #[serde(default = "default_port")]
    port: u16,
    local_key: LocalKey,
    #[serde(default)]
    version: ProtocolVersion,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    connect_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_timeout")]
    io_timeout: Duration,
    #[serde(with = "humantime_serde", default = "default_heartbeat_interval")]
    heartbeat_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_command_interval")]
    command_interval: Duration,
    #[serde(default)]
    connect_retry: ConnectRetry,
}

fn default_name() -> String {
    "lamp".to_string()
}

fn default_port() -> u16 {
    6668
}

fn default_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_heartbeat_interval() -> Duration {
    WorkerSettings::default().heartbeat_interval
}

fn default_command_interval() -> Duration {
    WorkerSettings::default().command_interval
}

impl Device {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn local_key(&self) -> &LocalKey {
        &self.local_key
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            device_id: self.id.clone(),
            version: self.version,
            connect: ConnectSettings {
                host: self.address.clone(),
                port: self.port,
                connect_timeout: self.connect_timeout,
                retry_initial_delay: self.connect_retry.initial_delay,
                retry_max_delay: self.connect_retry.max_delay,
                retry_attempts: self.connect_retry.attempts,
            },
            io_timeout: self.io_timeout,
        }
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            heartbeat_interval: self.heartbeat_interval,
            command_interval: self.command_interval,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ConnectRetry {
    #[serde(with = "humantime_serde")]
    initial_delay: Duration,
    #[serde(with = "humantime_serde")]
    max_delay: Duration,
    attempts: usize,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        ConnectRetry {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            attempts: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Api {
    enabled: bool,
    bind: SocketAddr,
}

impl Default for Api {
    fn default() -> Self {
        Api {
            enabled: true,
            bind: SocketAddr::from(([0, 0, 0, 0], 8765)),
        }
    }
}

impl Api {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn bind(&self) -> SocketAddr {
        self.bind
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KeyStore {
    path: PathBuf,
}

impl Default for KeyStore {
    fn default() -> Self {
        KeyStore {
            path: PathBuf::from("device_key.json"),
        }
    }
}

impl KeyStore {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core::default(),
                device: Device {
                    name: default_name(),
                    id: "bf0123456789abcdef".to_string(),
                    address: "127.0.0.1".to_string(),
                    port: default_port(),
                    local_key: "0123456789abcdef".parse().unwrap(),
                    version: ProtocolVersion::V33,
                    connect_timeout: Duration::from_millis(500),
                    io_timeout: Duration::from_millis(500),
                    heartbeat_interval: Duration::from_secs(60),
                    command_interval: Duration::ZERO,
                    connect_retry: ConnectRetry {
                        initial_delay: Duration::from_millis(10),
                        max_delay: Duration::from_millis(20),
                        attempts: 2,
                    },
                },
                data_points: DataPoints::default(),
                effects: EffectDefaults::default(),
                api: Api::default(),
                key_store: KeyStore::default(),
            },
        }
    }

    pub fn device_port(mut self, port: u16) -> Self {
        self.config.device.port = port;
        self
    }

    pub fn version(mut self, version: ProtocolVersion) -> Self {
        self.config.device.version = version;
        self
    }

    pub fn key_store_path(mut self, path: PathBuf) -> Self {
        self.config.key_store.path = path;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
