pub mod benchmark;
pub mod channel;
pub mod cli;
pub mod config;
pub mod effect;
pub mod engine;
pub mod errors;
pub mod init;
pub mod logging;
pub mod types;

// Re-export main types
pub use types::*;

pub use channel::{Channel, ChannelExecutor, ChannelState};
pub use effect::{Cause, Context, Effect, Exit, Scope};
pub use engine::Engine;

// Re-export init API for convenience
pub use init::{initialize, InitBuilder, InitOptions};
