//! Client configuration
//!
//! Defaults are compiled in from config.toml and can be overridden per
//! deployment with VOICEFRONT_* environment variables. The two behavior
//! flags cover the recognized deployment variants: whether connecting
//! auto-starts a listening session, and whether hiding the surface tears
//! the connection down (as opposed to only tearing down on shutdown).

use serde::Deserialize;
use tracing::info;

/// Environment variable overriding `server.url`
const ENV_SERVER_URL: &str = "VOICEFRONT_SERVER_URL";

/// Environment variable overriding `behavior.auto_start_on_connect`
const ENV_AUTO_START: &str = "VOICEFRONT_AUTO_START_ON_CONNECT";

/// Environment variable overriding `behavior.disconnect_on_hide`
const ENV_DISCONNECT_ON_HIDE: &str = "VOICEFRONT_DISCONNECT_ON_HIDE";

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ClientConfig {
    pub server: ServerConfig,
    pub behavior: BehaviorConfig,
}

/// Backend endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ServerConfig {
    /// Backend endpoint; http(s) schemes are rewritten to ws(s) when the
    /// WebSocket URL is built
    pub url: String,
}

/// Deployment behavior flags
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BehaviorConfig {
    /// Start a listening session immediately after each (re)connect
    #[serde(default)]
    pub auto_start_on_connect: bool,
    /// Stop and disconnect when the surface is hidden, not only on shutdown
    #[serde(default = "default_disconnect_on_hide")]
    pub disconnect_on_hide: bool,
}

fn default_disconnect_on_hide() -> bool {
    true
}

/// Load configuration from the embedded config.toml plus env overrides
pub(crate) fn load() -> Result<ClientConfig, ConfigError> {
    const CONFIG_TOML: &str = include_str!("../config.toml");
    let mut config: ClientConfig = toml::from_str(CONFIG_TOML)?;
    apply_env_overrides(&mut config)?;
    validate_server_url(&config.server.url)?;
    Ok(config)
}

/// Overlay VOICEFRONT_* environment variables onto the embedded defaults
fn apply_env_overrides(config: &mut ClientConfig) -> Result<(), ConfigError> {
    if let Ok(url) = std::env::var(ENV_SERVER_URL) {
        info!(url = %url, "Server URL overridden from environment");
        config.server.url = url;
    }
    if let Ok(value) = std::env::var(ENV_AUTO_START) {
        config.behavior.auto_start_on_connect = parse_bool_flag(ENV_AUTO_START, &value)?;
    }
    if let Ok(value) = std::env::var(ENV_DISCONNECT_ON_HIDE) {
        config.behavior.disconnect_on_hide = parse_bool_flag(ENV_DISCONNECT_ON_HIDE, &value)?;
    }
    Ok(())
}

/// Parse a boolean environment flag
fn parse_bool_flag(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidFlag {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

/// Reject endpoints the WebSocket layer cannot use
fn validate_server_url(server_url: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(server_url).map_err(|e| ConfigError::InvalidUrl {
        url: server_url.to_string(),
        reason: e.to_string(),
    })?;
    match parsed.scheme() {
        "http" | "https" | "ws" | "wss" => {}
        other => {
            return Err(ConfigError::InvalidUrl {
                url: server_url.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            })
        }
    }
    if parsed.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            url: server_url.to_string(),
            reason: "no host".to_string(),
        });
    }
    Ok(())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub(crate) enum ConfigError {
    #[error("Failed to parse config.toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid boolean value '{value}' for {name}")]
    InvalidFlag { name: String, value: String },
}
