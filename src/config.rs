//! # Deployment Configuration
//!
//! All knobs of the deploy pipeline live in one TOML file. Every field has a
//! default matching the bench setup (NodeMCU on `/dev/ttyUSB0`), so an empty
//! file, or no file at all, is a valid configuration as long as the Pusher
//! key comes from the environment.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [pusher]
//! cluster = "us2"
//! channel = "travis"
//! event = "deploy_complete"
//!
//! [artifact]
//! base_url = "https://dl.bintray.com/project802/led-sectional"
//! file_name = "LED_Sectional.ino.bin"
//! propagation_delay_secs = 10
//!
//! [flash]
//! tool = "esptool"
//! board = "nodemcu"
//! upload_baud = 921600
//!
//! [device]
//! serial = "/dev/ttyUSB0"
//! baud = 115200
//!
//! [verify]
//! marker = "Time is now "
//! read_timeout_secs = 30
//! ```
//!
//! `PUSHER_KEY` and `PUSHER_CLUSTER` in the environment override the file.
//! A `.env` file is not read; export the variables in the service's
//! environment (for example a systemd `EnvironmentFile=`) or put the key in
//! the TOML file.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Upper bound for `verify.read_timeout_secs`.
pub const MAX_READ_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("missing required setting '{0}'")]
    Missing(&'static str),
    #[error("invalid setting '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Main configuration struct for the notification, artifact, flash, device and verify stages.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub pusher: PusherConfig,
    #[serde(default)]
    pub artifact: ArtifactConfig,
    #[serde(default)]
    pub flash: FlashConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
}

/// Push-notification service settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PusherConfig {
    /// Application key. Usually supplied through `PUSHER_KEY`.
    #[serde(default)]
    pub key: String,
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Replaces `wss://ws-<cluster>.pusher.com` when set.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_channel")]
    pub channel: String,
    #[serde(default = "default_event")]
    pub event: String,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
    /// Silence tolerated after a keep-alive ping before the connection is dropped.
    #[serde(default = "default_pong_timeout_secs")]
    pub pong_timeout_secs: u64,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            cluster: default_cluster(),
            endpoint: None,
            channel: default_channel(),
            event: default_event(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
            pong_timeout_secs: default_pong_timeout_secs(),
        }
    }
}

impl PusherConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

/// Where firmware images are downloaded from and stored.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Local path of the downloaded image. Defaults to `file_name` in the working directory.
    #[serde(default)]
    pub local_path: Option<PathBuf>,
    #[serde(default = "default_propagation_delay_secs")]
    pub propagation_delay_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            file_name: default_file_name(),
            local_path: None,
            propagation_delay_secs: default_propagation_delay_secs(),
        }
    }
}

impl ArtifactConfig {
    pub fn local_path(&self) -> PathBuf {
        self.local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&self.file_name))
    }

    pub fn propagation_delay(&self) -> Duration {
        Duration::from_secs(self.propagation_delay_secs)
    }
}

/// Flashing tool invocation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FlashConfig {
    #[serde(default = "default_tool")]
    pub tool: String,
    #[serde(default = "default_verbosity")]
    pub verbosity: String,
    #[serde(default = "default_board")]
    pub board: String,
    #[serde(default = "default_upload_baud")]
    pub upload_baud: u32,
    #[serde(default = "default_flash_address")]
    pub address: String,
}

impl Default for FlashConfig {
    fn default() -> Self {
        Self {
            tool: default_tool(),
            verbosity: default_verbosity(),
            board: default_board(),
            upload_baud: default_upload_baud(),
            address: default_flash_address(),
        }
    }
}

/// The attached device's serial console.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    #[serde(default = "default_serial")]
    pub serial: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial: default_serial(),
            baud: default_baud(),
        }
    }
}

/// Boot verification settings.
///
/// `max_lines` and `max_verify_secs` are off by default: a device that keeps
/// printing without ever reaching the marker is only stopped by silence.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VerifyConfig {
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default)]
    pub max_lines: Option<usize>,
    #[serde(default)]
    pub max_verify_secs: Option<u64>,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            read_timeout_secs: default_read_timeout_secs(),
            max_lines: None,
            max_verify_secs: None,
        }
    }
}

impl VerifyConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_verify_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Apply `PUSHER_KEY` / `PUSHER_CLUSTER` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_with(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("PUSHER_KEY").filter(|v| !v.is_empty()) {
            self.pusher.key = key;
        }
        if let Some(cluster) = lookup("PUSHER_CLUSTER").filter(|v| !v.is_empty()) {
            self.pusher.cluster = cluster;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pusher.key.trim().is_empty() {
            return Err(ConfigError::Missing("pusher.key"));
        }
        if self.pusher.endpoint.is_none() && self.pusher.cluster.trim().is_empty() {
            return Err(ConfigError::Missing("pusher.cluster"));
        }
        if self.pusher.channel.is_empty() {
            return Err(ConfigError::Missing("pusher.channel"));
        }
        if self.pusher.event.is_empty() {
            return Err(ConfigError::Missing("pusher.event"));
        }
        if self.artifact.file_name.is_empty() {
            return Err(ConfigError::Missing("artifact.file_name"));
        }
        if self.verify.marker.is_empty() {
            return Err(ConfigError::Missing("verify.marker"));
        }
        if self.device.baud == 0 {
            return Err(ConfigError::Invalid {
                field: "device.baud",
                reason: "must be > 0".to_string(),
            });
        }
        if self.flash.upload_baud == 0 {
            return Err(ConfigError::Invalid {
                field: "flash.upload_baud",
                reason: "must be > 0".to_string(),
            });
        }
        if self.pusher.pong_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "pusher.pong_timeout_secs",
                reason: "must be > 0".to_string(),
            });
        }
        if self.verify.read_timeout_secs == 0 || self.verify.read_timeout_secs > MAX_READ_TIMEOUT_SECS {
            return Err(ConfigError::Invalid {
                field: "verify.read_timeout_secs",
                reason: format!("must be between 1 and {}", MAX_READ_TIMEOUT_SECS),
            });
        }
        if self.verify.max_lines == Some(0) {
            return Err(ConfigError::Invalid {
                field: "verify.max_lines",
                reason: "must be > 0 when set".to_string(),
            });
        }
        if self.verify.max_verify_secs == Some(0) {
            return Err(ConfigError::Invalid {
                field: "verify.max_verify_secs",
                reason: "must be > 0 when set".to_string(),
            });
        }
        Ok(())
    }
}

// Default value functions
fn default_cluster() -> String { "us2".to_string() }
fn default_channel() -> String { "travis".to_string() }
fn default_event() -> String { "deploy_complete".to_string() }
fn default_reconnect_delay_secs() -> u64 { 5 }
fn default_pong_timeout_secs() -> u64 { 30 }
fn default_base_url() -> String { "https://dl.bintray.com/project802/led-sectional".to_string() }
fn default_file_name() -> String { "LED_Sectional.ino.bin".to_string() }
fn default_propagation_delay_secs() -> u64 { 10 }
fn default_tool() -> String { "esptool".to_string() }
fn default_verbosity() -> String { "-vv".to_string() }
fn default_board() -> String { "nodemcu".to_string() }
fn default_upload_baud() -> u32 { 921600 }
fn default_flash_address() -> String { "0x00000".to_string() }
fn default_serial() -> String { "/dev/ttyUSB0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_marker() -> String { "Time is now ".to_string() }
fn default_read_timeout_secs() -> u64 { 30 }

/// Load configuration from a TOML file at the given path.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => Ok(config),
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                Err(ConfigError::Toml(e))
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path.display(), e);
            Err(ConfigError::Io(e))
        }
    }
}

/// Like [`load_config`], but a missing file yields the defaults.
pub fn load_config_or_default(path: &Path) -> Result<Config, ConfigError> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::warn!("Config file '{}' not found, using defaults", path.display());
        Ok(Config::default())
    }
}
