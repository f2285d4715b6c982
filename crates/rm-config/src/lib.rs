//! Routemaster Listener Server Configuration
//!
//! Loaded in three layers, later ones winning:
//! - Built-in defaults
//! - An optional TOML file named by `ROUTEMASTER_CONFIG`
//! - Environment variable overrides
//!
//! ```toml
//! secret = "9b1f0c2e-..."
//!
//! [listener]
//! host = "0.0.0.0"
//! port = 8080
//! path = "/events"
//! max_body_bytes = 10485760
//!
//! [diagnostics]
//! sink = "file"
//! file = "/var/log/routemaster/diagnostics.log"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Names the TOML file to load
pub const CONFIG_PATH_VAR: &str = "ROUTEMASTER_CONFIG";

const SECRET_VAR: &str = "ROUTEMASTER_UUID";
const HOST_VAR: &str = "LISTENER_HOST";
const PORT_VAR: &str = "LISTENER_PORT";
const PATH_VAR: &str = "LISTENER_PATH";
const MAX_BODY_VAR: &str = "LISTENER_MAX_BODY_BYTES";
const SINK_VAR: &str = "DIAGNOSTICS_SINK";
const SINK_FILE_VAR: &str = "DIAGNOSTICS_FILE";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Subscriber secret is not set (ROUTEMASTER_UUID or `secret`)")]
    MissingSecret,

    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Complete server configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Subscriber UUID the bus sends as Basic-auth username
    pub secret: String,
    pub listener: ListenerSettings,
    pub diagnostics: DiagnosticsSettings,
}

/// HTTP binding for the webhook endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub max_body_bytes: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            path: "/events".to_string(),
            max_body_bytes: 10 * 1024 * 1024,
        }
    }
}

impl ListenerSettings {
    /// `host:port` for binding
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where diagnostic records go
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsSettings {
    pub sink: SinkKind,
    /// Required when `sink` is `file`
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Stderr,
    Tracing,
    File,
}

impl FromStr for SinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "stderr" => Ok(Self::Stderr),
            "tracing" => Ok(Self::Tracing),
            "file" => Ok(Self::File),
            _ => Err(ConfigError::InvalidValue {
                key: SINK_VAR.to_string(),
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stderr => "stderr",
            Self::Tracing => "tracing",
            Self::File => "file",
        })
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from the process environment: the file named by
    /// `ROUTEMASTER_CONFIG` if set, then env overrides, then validation.
    pub fn load() -> Result<Self> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    /// Same as `load`, reading variables through `lookup`.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup(CONFIG_PATH_VAR).filter(|p| !p.is_empty()) {
            Some(path) => {
                info!(path = %path, "Loading configuration file");
                Self::from_file(&path)?
            }
            None => {
                debug!("No configuration file set, using defaults");
                Self::default()
            }
        };

        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from environment variables read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup(SECRET_VAR) {
            self.secret = secret;
        }
        if let Some(host) = lookup(HOST_VAR) {
            self.listener.host = host;
        }
        if let Some(port) = lookup(PORT_VAR) {
            self.listener.port = parse_var(PORT_VAR, &port)?;
        }
        if let Some(path) = lookup(PATH_VAR) {
            self.listener.path = path;
        }
        if let Some(limit) = lookup(MAX_BODY_VAR) {
            self.listener.max_body_bytes = parse_var(MAX_BODY_VAR, &limit)?;
        }
        if let Some(sink) = lookup(SINK_VAR) {
            self.diagnostics.sink = sink.parse()?;
        }
        if let Some(file) = lookup(SINK_FILE_VAR) {
            self.diagnostics.file = Some(PathBuf::from(file));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.secret.trim().is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if !self.listener.path.starts_with('/') {
            return Err(ConfigError::Invalid(format!(
                "listener path must start with '/': {:?}",
                self.listener.path
            )));
        }
        if self.listener.max_body_bytes == 0 {
            return Err(ConfigError::Invalid(
                "listener max_body_bytes must be positive".to_string(),
            ));
        }
        if self.diagnostics.sink == SinkKind::File && self.diagnostics.file.is_none() {
            return Err(ConfigError::Invalid(
                "diagnostics sink `file` needs a file path".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}
