//! Server configuration.
//!
//! Loaded once at startup and passed into the server by value; nothing
//! reads configuration from the environment after boot.

use std::path::Path;

use miette::Diagnostic;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {path}")]
    #[diagnostic(code(shelf::config::read))]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file: {path}")]
    #[diagnostic(code(shelf::config::parse), help("Check the TOML syntax"))]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Bind address for the HTTP listener.
    pub listen: String,
    /// Base URL of the backing platform's REST API.
    pub api_base: String,
    /// Fallback token used for requests that carry no credentials.
    /// Anonymous reads work without one, at the platform's stingier
    /// unauthenticated rate limits.
    pub token: Option<String>,
    /// Log every platform call at debug level.
    pub trace_host: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:9595".to_string(),
            api_base: "https://api.github.com".to_string(),
            token: None,
            trace_host: false,
        }
    }
}

impl Config {
    /// Loads configuration from an optional TOML file, then fills the
    /// token from `SHELF_GITHUB_TOKEN` if the file left it unset.
    pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| {
                    ConfigError::Read {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
                toml::from_str(&text).map_err(|source| {
                    ConfigError::Parse {
                        path: path.display().to_string(),
                        source,
                    }
                })?
            }
            None => Config::default(),
        };
        if config.token.is_none() {
            config.token = std::env::var("SHELF_GITHUB_TOKEN").ok();
        }
        Ok(config)
    }
}
