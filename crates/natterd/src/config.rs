//! Server configuration.
//!
//! Values are layered, later layers winning:
//! 1. Built-in defaults
//! 2. TOML file (`--config`, `NATTER_CONFIG`, or `<config_dir>/natter/natterd.toml`)
//! 3. Environment (`NATTER_LISTEN`, `NATTER_SHUTDOWN_SECRET`)
//! 4. Command-line flags (applied by the binary)

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub use natter_protocol::DEFAULT_PORT;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "NATTER_CONFIG";

/// Environment variable overriding the listen address.
pub const LISTEN_ENV: &str = "NATTER_LISTEN";

/// Environment variable overriding the shutdown secret.
pub const SECRET_ENV: &str = "NATTER_SHUTDOWN_SECRET";

/// Server configuration.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the TCP listener binds to
    pub listen: String,

    /// Credential authorizing remote shutdown. `None` disables it.
    pub shutdown_secret: Option<String>,

    /// Maximum number of concurrently registered sessions
    pub max_sessions: usize,

    /// Sessions not heard from for this long are logged off. Unset keeps
    /// sessions until they log out or their connection closes.
    pub stale_after_secs: Option<u64>,

    /// Connections idle for this long are closed
    pub idle_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: format!("0.0.0.0:{DEFAULT_PORT}"),
            shutdown_secret: None,
            max_sessions: 100,
            stale_after_secs: None,
            idle_timeout_secs: 300,
        }
    }
}

// The secret never reaches logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen", &self.listen)
            .field(
                "shutdown_secret",
                &self.shutdown_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("max_sessions", &self.max_sessions)
            .field("stale_after_secs", &self.stale_after_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .finish()
    }
}

impl ServerConfig {
    /// Loads configuration from a TOML file. Missing keys take defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })
    }

    /// Resolves defaults, the config file and the environment.
    ///
    /// An explicit `path` must exist; the implicit locations are optional.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match implicit_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Applies environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(listen) = lookup(LISTEN_ENV) {
            debug!(listen = %listen, "Listen address overridden by environment");
            self.listen = listen;
        }
        if let Some(secret) = lookup(SECRET_ENV) {
            debug!("Shutdown secret overridden by environment");
            self.shutdown_secret = Some(secret);
        }
    }

    /// Replaces the port of the listen address, keeping the host.
    pub fn set_port(&mut self, port: u16) {
        let host = self
            .listen
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or(self.listen.as_str());
        self.listen = format!("{host}:{port}");
    }

    /// Checks limits and the secret.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Invalid("listen must not be empty".to_string()));
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid(
                "max_sessions must be greater than 0".to_string(),
            ));
        }
        if self.stale_after_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "stale_after_secs must be greater than 0 (omit it to disable idle reaping)"
                    .to_string(),
            ));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "idle_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if matches!(&self.shutdown_secret, Some(s) if s.is_empty()) {
            return Err(ConfigError::Invalid(
                "shutdown_secret must not be empty (omit it to disable remote shutdown)"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after_secs.map(Duration::from_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// `NATTER_CONFIG`, else `<config_dir>/natter/natterd.toml`.
fn implicit_config_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("natter").join("natterd.toml"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {error}")]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config file {path}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = ServerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.listen, "0.0.0.0:3410");
        assert!(config.shutdown_secret.is_none());
    }

    #[test]
    fn test_from_file_partial_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shutdown_secret = \"s3cret\"").unwrap();
        writeln!(file, "max_sessions = 5").unwrap();

        let config = ServerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.shutdown_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.stale_after_secs, None);
        assert_eq!(config.listen, "0.0.0.0:3410");
    }

    #[test]
    fn test_from_file_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_sessions = \"lots\"").unwrap();

        let err = ServerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_explicit_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (LISTEN_ENV, "127.0.0.1:4000"),
            (SECRET_ENV, "from-env"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_env(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.listen, "127.0.0.1:4000");
        assert_eq!(config.shutdown_secret.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_set_port_keeps_host() {
        let mut config = ServerConfig::default();
        config.set_port(9999);
        assert_eq!(config.listen, "0.0.0.0:9999");

        config.listen = "[::1]:3410".to_string();
        config.set_port(1234);
        assert_eq!(config.listen, "[::1]:1234");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = ServerConfig::default();
        config.max_sessions = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.shutdown_secret = Some(String::new());
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.stale_after_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_idle_reaping_is_opt_in() {
        let config = ServerConfig::default();
        assert_eq!(config.stale_after(), None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stale_after_secs = 600").unwrap();
        let config = ServerConfig::from_file(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.stale_after(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = ServerConfig {
            shutdown_secret: Some("hunter2".to_string()),
            ..Default::default()
        };
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
