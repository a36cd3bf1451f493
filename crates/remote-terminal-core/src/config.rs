//! Client configuration, loaded from TOML.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Endpoint, ProjectId};

const DEV_PORT: u16 = 7702;
const RELEASE_PORT: u16 = 7703;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Environment variable overriding `host`.
pub const HOST_ENV: &str = "REMOTE_TERMINAL_HOST";
/// Environment variable overriding `port`.
pub const PORT_ENV: &str = "REMOTE_TERMINAL_PORT";

/// Build mode, used to pick the default port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Development,
    Release,
}

impl BuildMode {
    /// Mode matching how this binary was compiled.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(debug_assertions) {
            Self::Development
        } else {
            Self::Release
        }
    }

    /// Port the terminal server listens on in this mode.
    #[must_use]
    pub const fn default_port(self) -> u16 {
        match self {
            Self::Development => DEV_PORT,
            Self::Release => RELEASE_PORT,
        }
    }
}

impl Default for BuildMode {
    fn default() -> Self {
        Self::current()
    }
}

/// Errors that can occur when loading config.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", .path.display())]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {}: {source}", .path.display())]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Invalid {name} value {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Terminal client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Host the terminal server runs on.
    pub host: String,
    /// Explicit port; derived from `mode` when unset.
    pub port: Option<u16>,
    /// Build mode used for port selection.
    pub mode: BuildMode,
    /// Connect timeout in seconds. `0` waits forever.
    pub connect_timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            mode: BuildMode::current(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file path. Returns None if file doesn't exist.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Loaded client config");
        Ok(Some(config))
    }

    /// Default config location: `<config_dir>/remote-terminal/config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("remote-terminal").join("config.toml"))
    }

    /// Apply `REMOTE_TERMINAL_HOST` / `REMOTE_TERMINAL_PORT` overrides.
    ///
    /// # Errors
    /// Returns error if the port variable is not a valid port number.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        let host = std::env::var(HOST_ENV).ok();
        let port = match std::env::var(PORT_ENV) {
            Ok(value) => Some(value.parse().map_err(|_| ConfigError::InvalidEnv {
                name: PORT_ENV,
                value,
            })?),
            Err(_) => None,
        };
        Ok(self.with_overrides(host, port))
    }

    /// Override host and port where given.
    #[must_use]
    pub fn with_overrides(mut self, host: Option<String>, port: Option<u16>) -> Self {
        if let Some(host) = host.filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if port.is_some() {
            self.port = port;
        }
        self
    }

    /// Port to dial, falling back to the build mode default.
    #[must_use]
    pub fn resolved_port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.mode.default_port())
    }

    /// Endpoint for a project's terminal session.
    #[must_use]
    pub fn endpoint_for(&self, project_id: &ProjectId) -> Endpoint {
        Endpoint::for_project(&self.host, self.resolved_port(), project_id)
    }

    /// Connect timeout, `None` when disabled.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.connect_timeout_secs))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_ports() {
        let mut config = ClientConfig {
            mode: BuildMode::Development,
            ..ClientConfig::default()
        };
        assert_eq!(config.resolved_port(), 7702);
        config.mode = BuildMode::Release;
        assert_eq!(config.resolved_port(), 7703);
        config.port = Some(9000);
        assert_eq!(config.resolved_port(), 9000);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: ClientConfig = toml::from_str(
            r#"
            host = "devbox"
            mode = "release"
            connect_timeout_secs = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "devbox");
        assert_eq!(config.port, None);
        assert_eq!(config.connect_timeout(), None);

        let id = ProjectId::new("p1").unwrap();
        assert_eq!(config.endpoint_for(&id).as_str(), "ws://devbox:7703/p1");
    }

    #[test]
    fn test_default_timeout() {
        assert_eq!(
            ClientConfig::default().connect_timeout(),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_overrides() {
        let config = ClientConfig::default().with_overrides(Some("remote".into()), Some(8000));
        assert_eq!(config.host, "remote");
        assert_eq!(config.resolved_port(), 8000);

        let unchanged = ClientConfig::default().with_overrides(Some(String::new()), None);
        assert_eq!(unchanged, ClientConfig::default());
    }

    #[test]
    fn test_load_missing_and_invalid() {
        let dir = tempfile::tempdir().unwrap();

        let missing = dir.path().join("missing.toml");
        assert!(ClientConfig::load(&missing).unwrap().is_none());

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "port = \"not a number\"").unwrap();
        assert!(matches!(
            ClientConfig::load(&bad),
            Err(ConfigError::ParseFailed { .. })
        ));

        let good = dir.path().join("good.toml");
        std::fs::write(&good, "port = 7800").unwrap();
        let loaded = ClientConfig::load(&good).unwrap().unwrap();
        assert_eq!(loaded.resolved_port(), 7800);
    }
}
