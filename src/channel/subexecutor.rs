//! Sub-executor states for `ConcatAll`
//!
//! While a concat runs, the owning executor's cursor holds one of these
//! instead of a channel. The states form a small machine:
//!
//! - `PullFromUpstream`: pick the next queued child, or pull a new element
//!   from the upstream executor and spawn a child for it
//! - `PullFromChild`: read one step from a child and route its element or
//!   done value back to the parent state
//! - `DrainChildExecutors`: upstream has finished; run the queued children out
//! - `Emit`: hand one value to the reader, then resume `next`

use std::collections::VecDeque;

use super::executor::ChannelExecutor;
use super::types::{CombineFn, OnEmitFn, OnPullFn, OnValue, UpstreamPullStrategy};
use crate::effect::{Cause, Effect, Exit};
use crate::types::Val;

/// A spawned child together with the policy for its elements
#[derive(Clone)]
pub(crate) struct ChildHandle {
    pub(crate) executor: ChannelExecutor,
    pub(crate) on_emit: OnEmitFn,
}

/// Queue of children; `None` marks the point where upstream is pulled again
pub(crate) type ChildQueue = VecDeque<Option<ChildHandle>>;

#[derive(Clone)]
pub(crate) struct PullFromUpstream {
    pub(crate) upstream_executor: ChannelExecutor,
    pub(crate) create_child: OnValue,
    /// Accumulated done value of the children that finished so far
    pub(crate) last_done: Option<Val>,
    pub(crate) active_child_executors: ChildQueue,
    pub(crate) combine_child_results: CombineFn,
    pub(crate) combine_with_child_result: CombineFn,
    pub(crate) on_pull: OnPullFn,
    pub(crate) on_emit: OnEmitFn,
}

#[derive(Clone)]
pub(crate) struct PullFromChild {
    pub(crate) child: ChildHandle,
    pub(crate) parent: Box<Subexecutor>,
}

#[derive(Clone)]
pub(crate) struct DrainChildExecutors {
    pub(crate) upstream_executor: ChannelExecutor,
    pub(crate) last_done: Option<Val>,
    pub(crate) active_child_executors: ChildQueue,
    pub(crate) upstream_done: Exit,
    pub(crate) combine_child_results: CombineFn,
    pub(crate) combine_with_child_result: CombineFn,
    pub(crate) on_pull: OnPullFn,
}

#[derive(Clone)]
pub(crate) enum Subexecutor {
    PullFromUpstream(PullFromUpstream),
    PullFromChild(PullFromChild),
    DrainChildExecutors(DrainChildExecutors),
    Emit { value: Val, next: Box<Subexecutor> },
}

impl Subexecutor {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Subexecutor::PullFromUpstream(_) => "PullFromUpstream",
            Subexecutor::PullFromChild(_) => "PullFromChild",
            Subexecutor::DrainChildExecutors(_) => "DrainChildExecutors",
            Subexecutor::Emit { .. } => "Emit",
        }
    }

    /// Close every executor this state still references
    ///
    /// Returns `None` when none of them has anything to clean up.
    pub(crate) fn close(&self, exit: &Exit) -> Option<Effect> {
        match self {
            Subexecutor::PullFromUpstream(state) => close_all(
                state
                    .active_child_executors
                    .iter()
                    .flatten()
                    .map(|child| child.executor.close(exit))
                    .chain(std::iter::once(state.upstream_executor.close(exit)))
                    .collect(),
            ),
            Subexecutor::PullFromChild(state) => close_all(vec![
                state.child.executor.close(exit),
                state.parent.close(exit),
            ]),
            Subexecutor::DrainChildExecutors(state) => close_all(
                state
                    .active_child_executors
                    .iter()
                    .flatten()
                    .map(|child| child.executor.close(exit))
                    .chain(std::iter::once(state.upstream_executor.close(exit)))
                    .collect(),
            ),
            Subexecutor::Emit { next, .. } => next.close(exit),
        }
    }

    /// Queue `child` at the back of an upstream-pulling or draining state
    pub(crate) fn enqueue_pull_from_child(self, child: ChildHandle) -> Subexecutor {
        match self {
            Subexecutor::PullFromUpstream(mut state) => {
                state.active_child_executors.push_back(Some(child));
                Subexecutor::PullFromUpstream(state)
            }
            Subexecutor::DrainChildExecutors(mut state) => {
                state.active_child_executors.push_back(Some(child));
                Subexecutor::DrainChildExecutors(state)
            }
            other => other,
        }
    }
}

/// Run every close effect in order, combining their failures
fn close_all(effects: Vec<Option<Effect>>) -> Option<Effect> {
    let effects: Vec<Effect> = effects.into_iter().flatten().collect();
    if effects.is_empty() {
        return None;
    }
    Some(Effect::from_fn(move |ctx| async move {
        let mut cause = Cause::Empty;
        for effect in effects {
            if let Exit::Failure(c) = effect.run(ctx.clone()).await {
                cause = cause.then(c);
            }
        }
        if cause.is_empty() {
            Exit::unit()
        } else {
            Exit::Failure(cause)
        }
    }))
}

/// Place the "pull upstream" marker according to `strategy`
///
/// Returns the separator to emit, if any, and the updated queue. Nothing is
/// queued when upstream is finished and no real child is waiting.
pub(crate) fn apply_upstream_pull_strategy(
    upstream_finished: bool,
    mut queue: ChildQueue,
    strategy: UpstreamPullStrategy,
) -> (Option<Val>, ChildQueue) {
    let should_enqueue = !upstream_finished || queue.iter().any(Option::is_some);
    match strategy {
        UpstreamPullStrategy::PullAfterNext(separator) => {
            if should_enqueue {
                if upstream_finished {
                    // front insertion would pop the marker again right away
                    let at = queue
                        .iter()
                        .position(Option::is_some)
                        .map_or(queue.len(), |index| index + 1);
                    queue.insert(at, None);
                } else {
                    queue.push_front(None);
                }
            }
            (separator, queue)
        }
        UpstreamPullStrategy::PullAfterAllEnqueued(separator) => {
            if should_enqueue {
                queue.push_back(None);
            }
            (separator, queue)
        }
    }
}
