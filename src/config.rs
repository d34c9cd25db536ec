//! Configuration management for the chunked upload server

use serde::Deserialize;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::io::DEFAULT_COPY_BUFFER_SIZE;
use crate::upload::DEFAULT_MAX_CHUNK_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub upload: UploadConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    /// Parent of the generated per-process staging root
    pub staging_parent: Option<PathBuf>,

    /// Fixed staging root; takes precedence over `staging_parent`
    pub staging_root: Option<PathBuf>,

    pub max_chunk_size: u64,
    pub copy_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            upload: UploadConfig {
                staging_parent: None,
                staging_root: None,
                max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
                copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            },
        }
    }
}

impl Config {
    /// Read the configuration from the process environment.
    ///
    /// A malformed value falls back to its own default with a warning;
    /// every other variable is still honored.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Build the configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let defaults = Config::default();
        let text = |name: &str| lookup(name).map(|value| value.to_string_lossy().into_owned());

        Config {
            server: ServerConfig {
                host: text("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_or_default("SERVER_PORT", text("SERVER_PORT"), defaults.server.port),
            },
            upload: UploadConfig {
                staging_parent: lookup("STAGING_PARENT_DIR").map(PathBuf::from),
                staging_root: lookup("STAGING_ROOT_DIR").map(PathBuf::from),
                max_chunk_size: parse_or_default(
                    "MAX_CHUNK_SIZE",
                    text("MAX_CHUNK_SIZE"),
                    defaults.upload.max_chunk_size,
                ),
                copy_buffer_size: parse_or_default(
                    "COPY_BUFFER_SIZE",
                    text("COPY_BUFFER_SIZE"),
                    defaults.upload.copy_buffer_size,
                ),
            },
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn parse_or_default<T>(name: &'static str, value: Option<String>, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(value) = value else {
        return default;
    };

    parse_value(name, &value).unwrap_or_else(|e| {
        tracing::warn!("{}, using default {}", e, default);
        default
    })
}

fn parse_value<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        name,
        value: value.to_string(),
    })
}
