//! Running channels to completion
//!
//! ## Entry points
//! - [`run`]: run a channel in a fresh scope and close the scope afterwards
//! - [`run_scoped`]: run a channel whose resources stay open until a
//!   caller-owned [`Scope`] closes
//! - [`run_collect`] / [`run_drain`]: run while gathering or discarding output
//!
//! The driver owns the top-level executor. It answers `FromEffect` by running
//! the effect and `Read` by stepping the upstream executors, and it releases
//! everything the executor holds once the run ends or is interrupted.

use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::executor::{identity_close_hook, ChannelExecutor};
use super::types::{Channel, ChannelState, ReadRequest};
use crate::effect::{Context, Deferred, Effect, ExecutionStrategy, Exit, Fiber, FiberId, Scope};
use crate::errors;

/// Serve `request` by stepping its upstream until the reader's callbacks fire
///
/// Nested reads are followed with an explicit stack instead of recursion. An
/// upstream effect that fails is reported to the waiting reader as its
/// upstream's outcome.
pub(crate) async fn read_upstream(request: ReadRequest, ctx: &Context) -> Exit {
    let mut stack: Vec<ReadRequest> = vec![request];

    while let Some(current) = stack.pop() {
        let Some(upstream) = current.upstream.clone() else {
            return Exit::die(
                errors::UNEXPECTED_END_OF_INPUT,
                "read with no upstream to read from",
            );
        };

        match upstream.run() {
            ChannelState::Emit => {
                let value = upstream.emitted().unwrap_or_default();
                if let Some(effect) = (current.on_emit)(value) {
                    if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                        return Exit::Failure(cause);
                    }
                }
            }
            ChannelState::Done(exit) => {
                if let Some(effect) = (current.on_done)(exit) {
                    if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                        return Exit::Failure(cause);
                    }
                }
            }
            ChannelState::FromEffect(effect) => {
                let outcome = (current.on_effect)(effect).run(ctx.clone()).await;
                match outcome {
                    Exit::Success(_) => stack.push(current),
                    Exit::Failure(cause) => {
                        trace!(upstream = upstream.id(), "Upstream effect failed");
                        if let Some(effect) = (current.on_done)(Exit::Failure(cause)) {
                            if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                                return Exit::Failure(cause);
                            }
                        }
                    }
                }
            }
            ChannelState::Read(nested) => {
                stack.push(current);
                stack.push(nested);
            }
        }
    }
    Exit::unit()
}

/// Step `executor` until it finishes
async fn interpret(executor: &ChannelExecutor, ctx: &Context) -> Exit {
    loop {
        match executor.run() {
            ChannelState::Done(exit) => return exit,
            ChannelState::Emit => {
                let value = executor.emitted();
                debug!(code = errors::TOP_LEVEL_EMIT, ?value, "Skipping element emitted at the top level");
            }
            ChannelState::FromEffect(effect) => {
                if let Exit::Failure(cause) = effect.run(ctx.clone()).await {
                    return Exit::Failure(cause);
                }
            }
            ChannelState::Read(request) => {
                if let Exit::Failure(cause) = read_upstream(request, ctx).await {
                    return Exit::Failure(cause);
                }
            }
        }
    }
}

/* ===================== Scoped runs ===================== */

/// Run `channel`, keeping its resources open until `scope` closes
///
/// The effect finishes with the channel's outcome. Releasing the channel is
/// deferred to a finalizer on a child of `scope`, so a release failure is
/// reported by closing `scope`.
pub fn run_scoped(channel: Channel, scope: &Scope) -> Effect {
    run_scoped_with(channel, scope, ExecutionStrategy::Sequential)
}

pub(crate) fn run_scoped_with(channel: Channel, scope: &Scope, strategy: ExecutionStrategy) -> Effect {
    let scope = scope.clone();
    Effect::from_fn(move |ctx| async move {
        let child = scope.fork(strategy);
        let channel_done = Deferred::new();
        let scope_done = Deferred::new();

        // The fiber finishes with the outcome of the release
        let fiber = {
            let channel_done = channel_done.clone();
            let scope_done = scope_done.clone();
            let ctx = ctx.clone();
            Fiber::spawn(move |id, interrupt| async move {
                let executor = ChannelExecutor::new(channel, None, identity_close_hook());
                debug!(executor = executor.id(), fiber = %id, "Channel run started");

                let exit = tokio::select! {
                    exit = interpret(&executor, &ctx) => exit,
                    _ = interrupt.cancelled() => {
                        let exit = Exit::interrupt(id);
                        executor.cancel_with(exit.clone());
                        exit
                    }
                };
                channel_done.complete(exit.clone());
                scope_done.wait().await;

                let released = match executor.close(&exit) {
                    Some(release) => release.run(ctx).await,
                    None => Exit::unit(),
                };
                if let Exit::Failure(cause) = &released {
                    warn!(%cause, executor = executor.id(), "Channel release failed");
                }
                debug!(executor = executor.id(), "Channel run released");
                released
            })
        };

        let finalizer = {
            let channel_done = channel_done.clone();
            child.add_finalizer(move |_| {
                Effect::from_future(async move {
                    scope_done.succeed_unit();
                    if channel_done.is_done() {
                        fiber.join().await
                    } else {
                        fiber.interrupt().await
                    }
                })
            })
        };
        if let Exit::Failure(cause) = finalizer.run(ctx).await {
            return Exit::Failure(cause);
        }
        channel_done.wait().await
    })
}

/* ===================== Top-level runs ===================== */

/// Closes the scope if the run is dropped before it could do so itself
struct CloseOnDrop {
    scope: Option<Scope>,
    ctx: Context,
}

impl CloseOnDrop {
    fn disarm(&mut self) -> Option<Scope> {
        self.scope.take()
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        let Some(scope) = self.scope.take() else {
            return;
        };
        let Ok(runtime) = Handle::try_current() else {
            warn!("Run dropped outside a runtime; channel resources were not released");
            return;
        };
        let close = scope.close(&Exit::interrupt(FiberId::new()));
        runtime.spawn(close.run(self.ctx.clone()));
    }
}

/// Run `channel` to completion in a fresh scope
pub fn run(channel: Channel) -> Effect {
    run_with(channel, ExecutionStrategy::Sequential)
}

pub(crate) fn run_with(channel: Channel, strategy: ExecutionStrategy) -> Effect {
    Effect::from_fn(move |ctx| async move {
        let scope = Scope::with_strategy(strategy);
        let mut guard = CloseOnDrop {
            scope: Some(scope.clone()),
            ctx: ctx.clone(),
        };

        let exit = run_scoped_with(channel, &scope, strategy).run(ctx.clone()).await;
        guard.disarm();
        let closed = scope.close(&exit).run(ctx).await;

        match closed {
            Exit::Success(_) => exit,
            Exit::Failure(release) => match exit {
                Exit::Success(_) => Exit::Failure(release),
                Exit::Failure(primary) => Exit::Failure(primary.then(release)),
            },
        }
    })
}

/// Run `channel`, succeeding with `[elements, done]`
pub fn run_collect(channel: Channel) -> Effect {
    run(channel.collect_elements())
}

/// Run `channel`, discarding its elements
pub fn run_drain(channel: Channel) -> Effect {
    run(channel.drain())
}
