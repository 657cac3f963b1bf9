//! Initialization for embedding applications
//!
//! Loads configuration, installs logging, and builds the process-wide
//! [`Engine`]. Call it once before running channels through [`engine()`].
//!
//! # Example
//!
//! ```rust,ignore
//! use conduit_core::init::InitBuilder;
//!
//! // Defaults plus conduit.toml / CONDUIT_* if present
//! let engine = InitBuilder::new().init()?;
//!
//! // Custom configuration
//! let engine = InitBuilder::new()
//!     .config_path("conduit.toml")
//!     .log_filter("conduit_core=debug")
//!     .init()?;
//! ```

use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::info;

use crate::config::Config;
use crate::engine::Engine;
use crate::logging;

/// Global initialization state
static INIT_STATE: OnceLock<InitState> = OnceLock::new();

#[derive(Debug)]
struct InitState {
    config: Config,
    engine: Engine,
}

/// Options for initializing the engine
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<String>,

    /// Log filter directive (overrides the config file, not `RUST_LOG`)
    pub log_filter: Option<String>,

    /// Whether to install the tracing subscriber
    pub install_logging: bool,
}

impl Default for InitOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            log_filter: None,
            install_logging: true,
        }
    }
}

/// Builder for constructing InitOptions
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self {
            options: InitOptions::default(),
        }
    }

    /// Set the config file path
    pub fn config_path(mut self, path: impl Into<String>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn log_filter(mut self, filter: impl Into<String>) -> Self {
        self.options.log_filter = Some(filter.into());
        self
    }

    pub fn install_logging(mut self, install: bool) -> Self {
        self.options.install_logging = install;
        self
    }

    pub fn init(self) -> Result<Engine> {
        initialize(self.options)
    }
}

impl Default for InitBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Load configuration without touching global state
pub fn load_config(options: &InitOptions) -> Result<Config> {
    let mut config = Config::builder()
        .config_path(options.config_path.as_ref().map(PathBuf::from))
        .build()
        .context("Failed to load configuration")?;

    if let Some(filter) = &options.log_filter {
        config.logging.filter = filter.clone();
    }
    Ok(config)
}

/// Initialize with the given options and return the engine
///
/// Calling this more than once is safe: later calls return the engine built
/// by the first.
pub fn initialize(options: InitOptions) -> Result<Engine> {
    if let Some(state) = INIT_STATE.get() {
        return Ok(state.engine.clone());
    }

    let config = load_config(&options)?;
    if options.install_logging {
        logging::init(&config.logging);
    }

    let engine = Engine::from_config(&config.engine);
    info!(
        strategy = ?config.engine.scope_strategy,
        bridge_capacity = config.engine.bridge_capacity,
        "Conduit initialized"
    );

    // A concurrent initializer may have won; keep its state
    let state = INIT_STATE.get_or_init(|| InitState { config, engine });
    Ok(state.engine.clone())
}

pub fn is_initialized() -> bool {
    INIT_STATE.get().is_some()
}

/// The engine built by [`initialize`]
pub fn engine() -> Result<Engine> {
    INIT_STATE
        .get()
        .map(|state| state.engine.clone())
        .ok_or_else(|| anyhow!("Conduit not initialized - call init() first"))
}

/// The configuration loaded by [`initialize`]
pub fn get_config() -> Result<&'static Config> {
    INIT_STATE
        .get()
        .map(|state| &state.config)
        .ok_or_else(|| anyhow!("Conduit not initialized - call init() first"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_applies_log_filter() {
        let options = InitOptions {
            log_filter: Some("conduit_core=trace".to_string()),
            ..InitOptions::default()
        };

        let config = load_config(&options).unwrap();

        assert_eq!(config.logging.filter, "conduit_core=trace");
    }

    #[test]
    fn test_missing_config_file_fails() {
        let options = InitOptions {
            config_path: Some("/nonexistent/conduit.toml".to_string()),
            ..InitOptions::default()
        };

        let result = load_config(&options);

        let Err(err) = result else {
            unreachable!("Expected a load error, got {:?}", result);
        };
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_initialize_is_idempotent() {
        let first = InitBuilder::new().install_logging(false).init().unwrap();
        let second = InitBuilder::new().install_logging(false).init().unwrap();

        assert!(is_initialized());
        assert_eq!(first.scope_strategy(), second.scope_strategy());
        assert!(engine().is_ok());
        assert!(get_config().is_ok());
    }
}
