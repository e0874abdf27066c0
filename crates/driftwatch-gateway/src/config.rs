// crates/driftwatch-gateway/src/config.rs
// ============================================================================
// Module: Gateway Configuration
// Description: TOML-backed configuration for the REST Gateway process.
// Purpose: Strict, fail-closed config parsing with an environment override
//          for the config path, in the teacher's configuration style.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file, falling back to defaults for
//! every field the file omits. Unlike the teacher's sprawling
//! `DecisionGateConfig`, this surface is small: a bind address, the
//! per-pair store directory, and the explanation model endpoint.

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "driftwatch.toml";
/// Environment variable used to override the config path.
const CONFIG_ENV_VAR: &str = "DRIFTWATCH_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Errors raised while loading or validating [`GatewayConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config io error: {0}")]
    Io(String),
    /// The config file was not valid TOML.
    #[error("config parse error: {0}")]
    Parse(String),
    /// The config was syntactically valid but failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Per-pair `SQLite` store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Explanation model configuration.
    pub explain: ExplainConfig,
}

impl GatewayConfig {
    /// Loads configuration from `path`, or from `DRIFTWATCH_CONFIG`/
    /// `./driftwatch.toml` when `path` is `None`.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read, is too large,
    /// is not valid TOML, or fails [`GatewayConfig::validate`].
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = fs::read_to_string(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        let config: Self = toml::from_str(&content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] when required fields are missing or
    /// out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.store.validate()?;
        self.explain.validate()?;
        Ok(())
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8787`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable permissive (`*`) CORS, matching §4.6's development posture.
    #[serde(default = "default_cors_permissive")]
    pub cors_permissive: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind(), cors_permissive: default_cors_permissive() }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.bind
            .parse::<std::net::SocketAddr>()
            .map_err(|_| ConfigError::Invalid("server.bind is not a valid socket address".to_string()))?;
        Ok(())
    }
}

/// Per-pair `SQLite` store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding one `SQLite` file per pair fingerprint.
    #[serde(default = "default_store_dir")]
    pub dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { dir: default_store_dir() }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("store.dir must be non-empty".to_string()));
        }
        Ok(())
    }
}

/// Explanation model configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplainConfig {
    /// Chat-completion-style endpoint URL.
    pub endpoint: String,
    /// Optional bearer token, typically supplied via an environment
    /// variable rather than checked into the config file.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Model identifier sent in the request body.
    #[serde(default = "default_explain_model")]
    pub model: String,
    /// Request timeout, in milliseconds.
    #[serde(default = "default_explain_timeout_ms")]
    pub timeout_ms: u64,
}

impl ExplainConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::Invalid("explain.endpoint must be non-empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Invalid("explain.timeout_ms must be greater than zero".to_string()));
        }
        Ok(())
    }

    /// Resolves the bearer token from `api_key_env`, when configured.
    #[must_use]
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_env.as_deref().and_then(|name| env::var(name).ok())
    }
}

fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

fn default_bind() -> String {
    "127.0.0.1:8787".to_string()
}

fn default_cors_permissive() -> bool {
    true
}

fn default_store_dir() -> PathBuf {
    PathBuf::from("./driftwatch-data")
}

fn default_explain_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_explain_timeout_ms() -> u64 {
    20_000
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Unit tests use unwrap for setup clarity.")]
mod tests {
    use super::*;

    #[test]
    fn server_config_rejects_invalid_bind() {
        let config = ServerConfig { bind: "not-an-address".to_string(), cors_permissive: true };
        assert!(config.validate().is_err());
    }

    #[test]
    fn explain_config_requires_endpoint() {
        let config = ExplainConfig {
            endpoint: String::new(),
            api_key_env: None,
            model: default_explain_model(),
            timeout_ms: default_explain_timeout_ms(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolve_api_key_reads_named_env_var() {
        let config = ExplainConfig {
            endpoint: "https://example.com/v1/chat/completions".to_string(),
            api_key_env: Some("DRIFTWATCH_TEST_API_KEY_DOES_NOT_EXIST".to_string()),
            model: default_explain_model(),
            timeout_ms: default_explain_timeout_ms(),
        };
        assert!(config.resolve_api_key().is_none());
    }
}
