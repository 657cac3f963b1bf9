//! Error codes and error types
//!
//! The engine never panics on bad input. Internal failures travel through the
//! channel's own error channel as [`Cause::Die`](crate::effect::Cause::Die)
//! carrying an [`ErrorInfo`](crate::types::ErrorInfo) tagged with one of the
//! codes below.
//!
//! | Code | Raised when |
//! |---|---|
//! | `DEFECT` | a user callback panicked while the engine computed the next step |
//! | `UNEXPECTED_END_OF_INPUT` | a `Read` found no upstream executor |
//! | `MISSING_DONE` | an executor reported `Done` without recording an exit |
//! | `MISSING_SERVICE` | an effect asked the context for a service that is not there |
//! | `FIBER_PANIC` | a forked task panicked or was dropped by the runtime |
//! | `BRIDGE_CLOSED` | a bridge producer went away without finishing |
//! | `TOP_LEVEL_EMIT` | the driver saw an element at the top level |

use thiserror::Error;

use crate::effect::Cause;

pub const DEFECT: &str = "Defect";
pub const UNEXPECTED_END_OF_INPUT: &str = "UnexpectedEndOfInput";
pub const MISSING_DONE: &str = "MissingDone";
pub const MISSING_SERVICE: &str = "MissingService";
pub const FIBER_PANIC: &str = "FiberPanic";
pub const BRIDGE_CLOSED: &str = "BridgeClosed";
pub const TOP_LEVEL_EMIT: &str = "TopLevelEmit";

/// Errors surfaced to applications embedding the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("channel failed: {0}")]
    Channel(#[from] Cause),

    #[error("failed to render configuration: {0}")]
    Render(#[from] toml::ser::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Stable identifier for logs and process exit reporting
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "CONFIG",
            EngineError::Channel(_) => "CHANNEL",
            EngineError::Render(_) => "RENDER",
            EngineError::Io(_) => "IO",
        }
    }
}
