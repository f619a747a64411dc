// Configuration loading and parsing (config/server.toml).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },
}

// ---------------------------------------------------------------------------
// server.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    #[serde(default)]
    pub draft: DraftSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Port the WebSocket listener binds on 127.0.0.1.
    pub ws_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DraftSection {
    /// Bound on each engine's event and pick-result streams. Should be
    /// generous relative to the message rate; an engine stalls on enqueue
    /// once a consumer lets this fill up.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Bound on each connection's hub outbox; a connection this many
    /// messages behind is dropped as dead.
    #[serde(default = "default_client_buffer")]
    pub client_buffer: usize,
}

fn default_channel_capacity() -> usize {
    256
}

fn default_client_buffer() -> usize {
    256
}

impl Default for DraftSection {
    fn default() -> Self {
        DraftSection {
            channel_capacity: default_channel_capacity(),
            client_buffer: default_client_buffer(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerSection { ws_port: 8080 },
            draft: DraftSection::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/server.toml` relative to
/// the given `base_dir`. Errors if the file is missing; `load_config()`
/// falls back to defaults instead.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let path = base_dir.join("config").join("server.toml");
    let text = std::fs::read_to_string(&path).map_err(|_| ConfigError::FileNotFound {
        path: path.clone(),
    })?;

    let config: Config = toml::from_str(&text).map_err(|e| ConfigError::ParseError {
        path: path.clone(),
        source: e,
    })?;

    validate(&config)?;

    Ok(config)
}

/// Convenience wrapper: loads config relative to the current working
/// directory, falling back to built-in defaults when no file exists.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    match load_config_from(&cwd) {
        Err(ConfigError::FileNotFound { .. }) => Ok(Config::default()),
        other => other,
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.ws_port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.ws_port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.draft.channel_capacity == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.channel_capacity".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.draft.client_buffer == 0 {
        return Err(ConfigError::ValidationError {
            field: "draft.client_buffer".into(),
            message: "must be greater than 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
