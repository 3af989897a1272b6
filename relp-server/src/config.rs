//! Collector configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RELP_CONFIG)
//! 3. Environment variables

use crate::server::ListenerConfig;
use relp_protocol::Offer;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Collector configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Extra lines for the server offer.
    pub offer: OfferConfig,
    /// How `relpd` prints received messages.
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("RELP_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.output.apply_env_overrides();
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "network.max_connections must be at least 1".to_string(),
            ));
        }
        for (name, value) in &self.offer.params {
            if name.is_empty() || name.contains(['=', '\n']) {
                return Err(ConfigError::ValidationError(format!(
                    "invalid offer parameter name {:?}",
                    name
                )));
            }
            if value.contains('\n') {
                return Err(ConfigError::ValidationError(format!(
                    "offer parameter {} must not contain a newline",
                    name
                )));
            }
            if matches!(name.as_str(), "relp_version" | "relp_software" | "commands") {
                return Err(ConfigError::ValidationError(format!(
                    "offer parameter {} is reserved",
                    name
                )));
            }
        }
        Ok(())
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Builds the listener settings this configuration describes.
    pub fn listener_config(&self) -> ListenerConfig {
        let offer = self
            .offer
            .params
            .iter()
            .fold(Offer::new(), |offer, (name, value)| offer.with_param(name, value));
        ListenerConfig {
            offer,
            ..ListenerConfig::new(self.network.bind_addr)
                .with_auto_ack(self.network.auto_ack)
                .with_max_connections(self.network.max_connections)
        }
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Acknowledge messages as soon as they are received.
    pub auto_ack: bool,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], relp_protocol::DEFAULT_PORT)),
            auto_ack: true,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("RELP_BIND") {
            match addr.parse() {
                Ok(parsed) => self.bind_addr = parsed,
                Err(_) => tracing::warn!("Ignoring invalid RELP_BIND {:?}", addr),
            }
        }

        if let Ok(auto_ack) = std::env::var("RELP_AUTO_ACK") {
            self.auto_ack = parse_bool(&auto_ack);
        }

        if let Ok(max) = std::env::var("RELP_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }
}

/// Extra `name=value` lines appended to the server offer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OfferConfig {
    pub params: BTreeMap<String, String>,
}

/// Output format for received messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// One human readable line per message.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(ConfigError::ValidationError(format!(
                "unknown output format {:?}",
                other
            ))),
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: OutputFormat,
}

impl OutputConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(format) = std::env::var("RELP_OUTPUT_FORMAT") {
            match format.parse() {
                Ok(parsed) => self.format = parsed,
                Err(e) => tracing::warn!("Ignoring RELP_OUTPUT_FORMAT: {}", e),
            }
        }
    }
}

fn parse_bool(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_addr.port(), 20514);
        assert!(config.network.auto_ack);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let mut config = Config::default();
        config.offer.params.insert("site".to_string(), "lab".to_string());
        config.output.format = OutputFormat::Json;

        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.network.bind_addr, config.network.bind_addr);
        assert_eq!(parsed.offer.params.get("site").map(String::as_str), Some("lab"));
        assert_eq!(parsed.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "network:\n  bind_addr: \"0.0.0.0:2514\"\n  auto_ack: false\noutput:\n  format: json"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.network.bind_addr.port(), 2514);
        assert!(!config.network.auto_ack);
        assert_eq!(config.network.max_connections, 1000);
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_from_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let bad = dir.path().join("bad.yaml");
        std::fs::write(&bad, "network:\n  bind_addr: not-an-address\n").unwrap();
        let err = Config::from_file(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(..)));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relpd.yaml");
        let mut config = Config::default();
        config.network.max_connections = 7;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.network.max_connections, 7);
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.network.max_connections = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.offer.params.insert("commands".to_string(), "x".to_string());
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.offer.params.insert("a=b".to_string(), "x".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_offer_value_with_newline_rejected() {
        let yaml = "offer:\n  params:\n    site: \"lab\\ncommands=open\"\n";
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, yaml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.offer.params["site"], "lab\ncommands=open");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("newline")
        ));

        let mut config = Config::default();
        config.offer.params.insert("site".to_string(), "lab".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_listener_config() {
        let mut config = Config::default();
        config.network.auto_ack = false;
        config.offer.params.insert("site".to_string(), "lab".to_string());

        let listener = config.listener_config();
        assert!(!listener.auto_ack);
        assert_eq!(listener.bind_addr, config.network.bind_addr);
        assert_eq!(listener.offer.param("site"), Some("lab"));
        assert!(listener.offer.supports("syslog"));
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("text".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("xml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("1"));
        assert!(parse_bool("TRUE"));
        assert!(!parse_bool("no"));
    }
}
