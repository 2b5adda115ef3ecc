//! Configuration for the relay server
//!
//! Loaded from TOML (`--config`, else `~/.impress/relay.toml`), then
//! overridden by `IMPRESS_RELAY_ADDR` and `IMPRESS_RELAY_TOKEN`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const ADDR_ENV: &str = "IMPRESS_RELAY_ADDR";
pub const TOKEN_ENV: &str = "IMPRESS_RELAY_TOKEN";

/// Top-level relay configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
}

/// Listener and access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP/WebSocket listener binds to
    pub addr: String,
    /// Shared access token; open access when unset
    pub token: Option<String>,
    /// Unix socket for the admin endpoint
    pub socket_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8787".to_string(),
            token: None,
            socket_path: None,
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Events buffered per session before slow connections are resynced
    pub broadcast_capacity: usize,
    /// Keep a session's state after its last participant leaves
    pub keep_empty_sessions: bool,
    /// Reject whiteboard/document events from roles without edit permission
    pub enforce_roles: bool,
    /// Seconds without activity before a participant is marked inactive
    pub idle_after_secs: u64,
    /// How often to look for idle participants
    pub idle_sweep_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            broadcast_capacity: 256,
            keep_empty_sessions: false,
            enforce_roles: false,
            idle_after_secs: 60,
            idle_sweep_secs: 15,
        }
    }
}

impl RelayConfig {
    /// Parse from a TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".impress").join("relay.toml"))
    }

    /// Load from an explicit path, the default location, or defaults, then
    /// apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(path) => {
                    tracing::info!("Loading relay config from {:?}", path);
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(addr) = lookup(ADDR_ENV) {
            self.server.addr = addr;
        }
        if let Some(token) = lookup(TOKEN_ENV) {
            self.server.token = Some(token).filter(|t| !t.is_empty());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.addr.trim().is_empty() {
            return Err(ConfigError::Invalid("server.addr must not be empty".to_string()));
        }
        if self.session.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "session.broadcast_capacity must be positive".to_string(),
            ));
        }
        if self.session.idle_sweep_secs == 0 {
            return Err(ConfigError::Invalid(
                "session.idle_sweep_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn idle_threshold(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session.idle_after_secs as i64)
    }
}
