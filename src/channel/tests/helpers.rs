//! Test helpers for channel tests
//!
//! Common utilities for stepping executors by hand and recording what
//! finalizers and callbacks observed.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::channel::driver::read_upstream;
use crate::channel::{identity_close_hook, Channel, ChannelExecutor, ChannelState};
use crate::effect::{Context, Effect, Exit};
use crate::types::Val;

/// Shared, ordered record of events
pub type Log = Arc<Mutex<Vec<Val>>>;

pub fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn entries(log: &Log) -> Vec<Val> {
    log.lock().clone()
}

/// Effect appending `value` to `log` when it runs
pub fn record(log: &Log, value: impl Into<Val>) -> Effect {
    let log = log.clone();
    let value = value.into();
    Effect::sync(move || {
        log.lock().push(value);
        Val::Unit
    })
}

/// Append directly, for use inside synchronous callbacks
pub fn push(log: &Log, value: impl Into<Val>) {
    log.lock().push(value.into());
}

pub fn ints(values: &[i64]) -> Vec<Val> {
    values.iter().copied().map(Val::Int).collect()
}

/// Top-level executor with no context
pub fn executor(channel: Channel) -> ChannelExecutor {
    ChannelExecutor::new(channel, None, identity_close_hook())
}

/// Step `executor` to completion, collecting the elements it emits
///
/// Effects and reads are served the way the driver serves them. A failing
/// effect or read ends the drive with that failure.
pub async fn drive(executor: &ChannelExecutor, ctx: &Context) -> (Vec<Val>, Exit) {
    let mut elements = Vec::new();
    loop {
        match executor.run() {
            ChannelState::Done(exit) => return (elements, exit),
            ChannelState::Emit => elements.push(executor.emitted().unwrap_or_default()),
            ChannelState::FromEffect(effect) => {
                if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                    return (elements, Exit::Failure(cause));
                }
            }
            ChannelState::Read(request) => {
                if let Exit::Failure(cause) = read_upstream(request, ctx).await {
                    return (elements, Exit::Failure(cause));
                }
            }
        }
    }
}

/// Step `executor` until it emits, returning the element
pub async fn next_element(executor: &ChannelExecutor, ctx: &Context) -> Val {
    loop {
        match executor.run() {
            ChannelState::Emit => return executor.emitted().unwrap_or_default(),
            ChannelState::FromEffect(effect) => {
                effect.run(ctx.clone()).await;
            }
            ChannelState::Read(request) => {
                read_upstream(request, ctx).await;
            }
            ChannelState::Done(exit) => unreachable!("Expected an element, got Done({:?})", exit),
        }
    }
}

/// Drive `channel` on a fresh executor, then close it with the final exit
///
/// Returns the elements, the channel's exit, and the outcome of the close.
pub async fn drive_and_close(channel: Channel) -> (Vec<Val>, Exit, Exit) {
    let ctx = Context::empty();
    let executor = executor(channel);
    let (elements, exit) = drive(&executor, &ctx).await;
    let closed = match executor.close(&exit) {
        Some(close) => close.run(ctx).await,
        None => Exit::unit(),
    };
    (elements, exit, closed)
}

/// Split the result of `run_collect` into elements and done value
pub fn collected(exit: Exit) -> (Vec<Val>, Val) {
    let Exit::Success(Val::List(mut parts)) = exit else {
        unreachable!("Expected [elements, done], got {:?}", exit);
    };
    let done = parts.pop().unwrap_or_default();
    let Some(Val::List(elements)) = parts.pop() else {
        unreachable!("Expected an element list, got {:?}", parts);
    };
    (elements, done)
}

/// Sum two integer done values, treating anything else as zero
pub fn sum(a: Val, b: Val) -> Val {
    Val::Int(a.as_int().unwrap_or(0) + b.as_int().unwrap_or(0))
}
