//! The instruction tree
//!
//! A [`Channel`] is an immutable handle to one [`Instruction`]. Trees are
//! shared freely between executors; running a channel never mutates it.

use std::fmt;
use std::sync::Arc;

use super::strategy::{ChildExecutorDecision, UpstreamPullRequest, UpstreamPullStrategy};
use crate::channel::bridge::BridgeInput;
use crate::effect::{Cause, Context, Effect, Exit};
use crate::types::Val;

/* ===================== Callbacks ===================== */

pub type ValueThunk = Arc<dyn Fn() -> Val + Send + Sync>;
pub type CauseThunk = Arc<dyn Fn() -> Cause + Send + Sync>;
pub type EffectThunk = Arc<dyn Fn() -> Effect + Send + Sync>;
pub type ChannelThunk = Arc<dyn Fn() -> Channel + Send + Sync>;
pub type OnValue = Arc<dyn Fn(Val) -> Channel + Send + Sync>;
pub type OnCause = Arc<dyn Fn(Cause) -> Channel + Send + Sync>;
pub type FinalizerFn = Arc<dyn Fn(&Exit) -> Effect + Send + Sync>;
pub type ReleaseFn = Arc<dyn Fn(Val, &Exit) -> Effect + Send + Sync>;
pub type CombineFn = Arc<dyn Fn(Val, Val) -> Val + Send + Sync>;
pub type OnPullFn = Arc<dyn Fn(UpstreamPullRequest) -> UpstreamPullStrategy + Send + Sync>;
pub type OnEmitFn = Arc<dyn Fn(&Val) -> ChildExecutorDecision + Send + Sync>;

/* ===================== Continuations ===================== */

/// Success and failure handlers of a `Fold`
#[derive(Clone)]
pub struct ContinuationK {
    pub on_success: OnValue,
    pub on_halt: OnCause,
}

impl ContinuationK {
    pub fn on_exit(&self, exit: Exit) -> Channel {
        match exit {
            Exit::Success(value) => (self.on_success)(value),
            Exit::Failure(cause) => (self.on_halt)(cause),
        }
    }
}

/* ===================== Instructions ===================== */

/// Fields of a `ConcatAll` instruction
#[derive(Clone)]
pub struct ConcatAll {
    /// Channel whose elements are turned into children
    pub outer: Channel,
    pub create_child: OnValue,
    /// Folds the done values of finished children
    pub combine_inners: CombineFn,
    /// Folds the children's accumulated result with the outer done value
    pub combine_all: CombineFn,
    pub on_pull: OnPullFn,
    pub on_emit: OnEmitFn,
}

pub enum Instruction {
    Emit(Val),
    SucceedNow(Val),
    Succeed(ValueThunk),
    Fail(CauseThunk),
    FromEffect(EffectThunk),
    Read { more: OnValue, done: ContinuationK },
    Fold { inner: Channel, k: ContinuationK },
    Ensuring { inner: Channel, finalizer: FinalizerFn },
    BracketOut { acquire: EffectThunk, release: ReleaseFn },
    Provide { context: Context, inner: Channel },
    PipeTo { left: Channel, right: Channel },
    ConcatAll(ConcatAll),
    Bridge { input: BridgeInput, inner: Channel },
    Suspend(ChannelThunk),
}

impl Instruction {
    pub fn tag(&self) -> &'static str {
        match self {
            Instruction::Emit(_) => "Emit",
            Instruction::SucceedNow(_) => "SucceedNow",
            Instruction::Succeed(_) => "Succeed",
            Instruction::Fail(_) => "Fail",
            Instruction::FromEffect(_) => "FromEffect",
            Instruction::Read { .. } => "Read",
            Instruction::Fold { .. } => "Fold",
            Instruction::Ensuring { .. } => "Ensuring",
            Instruction::BracketOut { .. } => "BracketOut",
            Instruction::Provide { .. } => "Provide",
            Instruction::PipeTo { .. } => "PipeTo",
            Instruction::ConcatAll(_) => "ConcatAll",
            Instruction::Bridge { .. } => "Bridge",
            Instruction::Suspend(_) => "Suspend",
        }
    }
}

/* ===================== Channel ===================== */

/// A bidirectional, resource-safe, pull-based program
///
/// Cloning is cheap. Build channels with the constructors in
/// [`constructors`](crate::channel::constructors).
#[derive(Clone)]
pub struct Channel(Arc<Instruction>);

impl Channel {
    pub fn new(instruction: Instruction) -> Self {
        Channel(Arc::new(instruction))
    }

    pub fn instruction(&self) -> &Instruction {
        &self.0
    }

    pub fn tag(&self) -> &'static str {
        self.0.tag()
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Channel({})", self.tag())
    }
}
