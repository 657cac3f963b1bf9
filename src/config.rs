//! Configuration loading
//!
//! Configuration is layered, later layers winning:
//!
//! 1. Built-in defaults
//! 2. A TOML file: the explicit path, else `CONDUIT_CONFIG_PATH`, else
//!    `conduit.toml` in the working directory (optional)
//! 3. Environment variables prefixed `CONDUIT_`, nested with `__`
//!    (`CONDUIT_ENGINE__BRIDGE_CAPACITY=4`)
//!
//! A `.env` file is read before the environment layer is applied.
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_core::config::Config;
//!
//! let config = Config::builder()
//!     .config_path(Some("conduit.toml".into()))
//!     .build()?;
//! ```

use ::config::{Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::effect::ExecutionStrategy;
use crate::errors::EngineError;

pub const DEFAULT_CONFIG_FILE: &str = "conduit.toml";
pub const CONFIG_PATH_ENV: &str = "CONDUIT_CONFIG_PATH";
pub const ENV_PREFIX: &str = "CONDUIT";

/* ===================== Sections ===================== */

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Strategy of the child scope each scoped run forks
    pub scope_strategy: ExecutionStrategy,

    /// Buffer size of bridge inputs built by the engine
    pub bridge_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scope_strategy: ExecutionStrategy::Sequential,
            bridge_capacity: crate::channel::DEFAULT_BRIDGE_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive; `RUST_LOG` takes precedence
    pub filter: String,
    pub ansi: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            ansi: true,
        }
    }
}

/* ===================== Loading ===================== */

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with the default search path
    pub fn load() -> Result<Self, EngineError> {
        Self::builder().build()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, EngineError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    env_prefix: String,
    read_dotenv: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            config_path: None,
            env_prefix: ENV_PREFIX.to_string(),
            read_dotenv: true,
        }
    }
}

impl ConfigBuilder {
    /// Config file to read instead of searching; the file must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn read_dotenv(mut self, read: bool) -> Self {
        self.read_dotenv = read;
        self
    }

    pub fn build(self) -> Result<Config, EngineError> {
        if self.read_dotenv {
            dotenvy::dotenv().ok();
        }

        let explicit = self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));

        let file = match &explicit {
            Some(path) => File::from(path.as_path())
                .format(FileFormat::Toml)
                .required(true),
            None => File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false),
        };
        debug!(path = ?explicit, prefix = %self.env_prefix, "Loading configuration");

        let layers = ::config::Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(layers.try_deserialize()?)
    }
}
