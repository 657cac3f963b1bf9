//! The channel execution engine
//!
//! ## Layout
//! - [`types`]: the instruction tree and the signals an executor hands back
//! - [`constructors`]: the public way to build channels
//! - [`executor`]: the step interpreter and its continuation stack
//! - `concat`: the `ConcatAll` sub-executor machine
//! - [`bridge`]: draining a pulled upstream into a push-style input
//! - [`driver`]: running a channel to completion inside a scope

pub mod bridge;
pub mod constructors;
pub mod driver;
pub mod executor;
pub mod types;

mod concat;
mod continuation;
mod subexecutor;

#[cfg(test)]
mod tests;

pub use bridge::{BridgeInput, DEFAULT_BRIDGE_CAPACITY};
pub use driver::{run, run_collect, run_drain, run_scoped};
pub use executor::{identity_close_hook, ChannelExecutor, CloseLastSubstream};
pub use types::{
    Channel, ChannelState, ChildExecutorDecision, ContinuationK, Instruction, ReadRequest,
    UpstreamPullRequest, UpstreamPullStrategy,
};
