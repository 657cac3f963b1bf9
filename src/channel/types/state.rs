//! Signals returned by one interpretation step

use std::fmt;
use std::sync::Arc;

use crate::channel::executor::ChannelExecutor;
use crate::effect::{Effect, Exit};
use crate::types::Val;

pub type OnEffect = Arc<dyn Fn(Effect) -> Effect + Send + Sync>;
pub type OnReadEmit = Arc<dyn Fn(Val) -> Option<Effect> + Send + Sync>;
pub type OnReadDone = Arc<dyn Fn(Exit) -> Option<Effect> + Send + Sync>;

/// A pending read against an upstream executor
///
/// The callbacks update the reading executor. Any effect they return must run
/// before the reader is stepped again.
pub struct ReadRequest {
    /// `None` when the channel reads with nothing piped into it
    pub upstream: Option<ChannelExecutor>,
    /// Wraps every effect the upstream suspends on
    pub on_effect: OnEffect,
    pub on_emit: OnReadEmit,
    pub on_done: OnReadDone,
}

impl ReadRequest {
    pub fn new(
        upstream: Option<ChannelExecutor>,
        on_emit: OnReadEmit,
        on_done: OnReadDone,
    ) -> Self {
        Self {
            upstream,
            on_effect: Arc::new(|effect| effect),
            on_emit,
            on_done,
        }
    }

    pub fn with_on_effect(mut self, on_effect: OnEffect) -> Self {
        self.on_effect = on_effect;
        self
    }
}

/// What the executor needs from its caller before it can continue
pub enum ChannelState {
    /// Finished; the exit is also available from `done()`
    Done(Exit),
    /// An element is available from `emitted()`
    Emit,
    FromEffect(Effect),
    Read(ReadRequest),
}

impl ChannelState {
    pub fn is_done(&self) -> bool {
        matches!(self, ChannelState::Done(_))
    }

    /// The effect to run, if this state suspends on one
    pub fn into_effect(self) -> Option<Effect> {
        match self {
            ChannelState::FromEffect(effect) => Some(effect),
            _ => None,
        }
    }
}

impl fmt::Debug for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelState::Done(exit) => f.debug_tuple("Done").field(exit).finish(),
            ChannelState::Emit => f.write_str("Emit"),
            ChannelState::FromEffect(_) => f.write_str("FromEffect(..)"),
            ChannelState::Read(request) => match &request.upstream {
                Some(upstream) => write!(f, "Read(executor {})", upstream.id()),
                None => f.write_str("Read(no upstream)"),
            },
        }
    }
}
