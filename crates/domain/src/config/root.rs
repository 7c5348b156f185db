use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::forwarder::ForwarderSettings;
use super::listener::ListenerSettings;
use super::logging::LoggingConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    FileRead(String, String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid listener config: {0}")]
    InvalidListener(String),
}

/// Overrides taken from the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen_address: Option<String>,
    pub listen_port: Option<u16>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub forwarder: ForwarderSettings,

    #[serde(default = "default_listeners")]
    pub listeners: Vec<ListenerSettings>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            forwarder: ForwarderSettings::default(),
            listeners: default_listeners(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration, in priority order: explicit path,
    /// `warden-dns.toml` in the working directory,
    /// `/etc/warden-dns/config.toml`, built-in defaults.
    pub fn load(path: Option<&str>, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else if std::path::Path::new("warden-dns.toml").exists() {
            Self::from_file("warden-dns.toml")?
        } else if std::path::Path::new("/etc/warden-dns/config.toml").exists() {
            Self::from_file("/etc/warden-dns/config.toml")?
        } else {
            Self::default()
        };

        config.apply_cli_overrides(overrides);

        for listener in &config.listeners {
            listener
                .validate()
                .map_err(ConfigError::InvalidListener)?;
        }

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_string(), e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(address) = overrides.listen_address {
            for listener in &mut self.listeners {
                listener.address = address.clone();
            }
        }
        if let Some(port) = overrides.listen_port {
            for listener in &mut self.listeners {
                listener.port = port;
            }
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }
}

fn default_listeners() -> Vec<ListenerSettings> {
    vec![
        ListenerSettings::udp("0.0.0.0", 53),
        ListenerSettings::tcp("0.0.0.0", 53),
    ]
}
