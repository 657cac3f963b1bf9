//! Configured driver
//!
//! An [`Engine`] bundles the settings a run needs (the base [`Context`]
//! effects see, the strategy of the child scope a scoped run forks, and the
//! capacity of bridge inputs) so callers do not thread them through every
//! call.

use std::collections::HashMap;
use tracing::debug;

use crate::channel::driver::{run_scoped_with, run_with};
use crate::channel::{BridgeInput, Channel, DEFAULT_BRIDGE_CAPACITY};
use crate::config::EngineConfig;
use crate::effect::{Context, ExecutionStrategy, Exit, Scope};
use crate::types::Val;

#[derive(Debug, Clone)]
pub struct Engine {
    context: Context,
    scope_strategy: ExecutionStrategy,
    bridge_capacity: usize,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self {
            context: Context::empty(),
            scope_strategy: ExecutionStrategy::Sequential,
            bridge_capacity: DEFAULT_BRIDGE_CAPACITY,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            context: Context::empty(),
            scope_strategy: config.scope_strategy,
            bridge_capacity: config.bridge_capacity.max(1),
        }
    }

    /// Replace the base context
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    /// Add services to the base context
    pub fn with_services(mut self, services: HashMap<String, Val>) -> Self {
        self.context = self.context.merge(&Context::from_map(services));
        self
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn scope_strategy(&self) -> ExecutionStrategy {
        self.scope_strategy
    }

    pub fn bridge_input(&self) -> BridgeInput {
        BridgeInput::with_capacity(self.bridge_capacity)
    }

    /* ===================== Runs ===================== */

    /// Run `channel` in a fresh scope, releasing everything before returning
    pub async fn run(&self, channel: Channel) -> Exit {
        debug!(channel = channel.tag(), strategy = ?self.scope_strategy, "Engine run");
        run_with(channel, self.scope_strategy)
            .run(self.context.clone())
            .await
    }

    /// Run `channel`, leaving its resources open until `scope` closes
    pub async fn run_scoped(&self, channel: Channel, scope: &Scope) -> Exit {
        run_scoped_with(channel, scope, self.scope_strategy)
            .run(self.context.clone())
            .await
    }

    /// Run `channel`, succeeding with `[elements, done]`
    pub async fn run_collect(&self, channel: Channel) -> Exit {
        self.run(channel.collect_elements()).await
    }

    /// Run `channel`, discarding its elements
    pub async fn run_drain(&self, channel: Channel) -> Exit {
        self.run(channel.drain()).await
    }
}
