//! `ConcatAll` scheduling
//!
//! A concat turns every element of an upstream channel into a child channel
//! and merges the children's output. Pull policies decide when upstream is
//! read again and may interleave separators. Emit policies may close or
//! requeue a child after any element. Done values are folded as children
//! finish.
//!
//! The closing of a finished child is deferred into the executor's pending
//! `close_last_substream` and runs just before the next upstream pull or at
//! the end of the concat.

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::{debug, trace};

use super::continuation::Finalizer;
use super::executor::{ChannelExecutor, CloseLastSubstream, Cursor, ExecutorState};
use super::subexecutor::{
    apply_upstream_pull_strategy, ChildHandle, DrainChildExecutors, PullFromChild,
    PullFromUpstream, Subexecutor,
};
use super::types::{
    ChannelState, ChildExecutorDecision, CombineFn, ConcatAll, OnEffect, OnReadDone, OnReadEmit,
    ReadRequest, UpstreamPullRequest,
};
use crate::channel::Channel;
use crate::effect::{catch_defect, Cause, Effect, Exit};
use crate::types::Val;

type CloseFn = Box<dyn FnOnce(&Exit) -> Option<Effect> + Send>;

/// Fold a finished child's done value into the running total
///
/// The first child's value is taken as is.
fn combine_done(combine: &CombineFn, last: Option<Val>, next: Val) -> Result<Val, Cause> {
    match last {
        None => Ok(next),
        Some(last) => catch_defect(|| combine(last, next)),
    }
}

/// Combine the children's total with upstream's done value
fn combine_upstream(combine: &CombineFn, last: Option<Val>, upstream_done: Exit) -> Exit {
    match upstream_done {
        Exit::Success(done) => {
            let last = last.unwrap_or(Val::Unit);
            Exit::from(catch_defect(|| combine(last, done)))
        }
        failure => failure,
    }
}

/// Queue `close` behind whatever close is already pending
fn append_close(pending: Option<Effect>, close: Option<Effect>) -> Option<Effect> {
    match (pending, close) {
        (Some(pending), Some(close)) => Some(pending.ensuring(close)),
        (pending, close) => pending.or(close),
    }
}

impl ExecutorState {
    /// Start a concat: an upstream executor plus the pulling sub-executor state
    pub(crate) fn concat_all(&mut self, this: &ChannelExecutor, concat: &ConcatAll) {
        let parent = this.downgrade();
        let hook: CloseLastSubstream = Arc::new(move |close: Effect| {
            let parent = parent.clone();
            Effect::suspend(move || match parent.upgrade() {
                Some(parent) => {
                    let mut state = parent.lock();
                    let pending = state.close_last_substream.take();
                    state.close_last_substream = append_close(pending, Some(close));
                    Effect::unit()
                }
                None => close,
            })
        });

        let upstream = ChannelExecutor::new(concat.outer.clone(), self.provided_env.clone(), hook);
        upstream.set_input(self.input.clone());
        debug!(executor = this.id(), upstream = upstream.id(), "Starting concat");

        self.cursor = Cursor::Subexecutor(Subexecutor::PullFromUpstream(PullFromUpstream {
            upstream_executor: upstream,
            create_child: concat.create_child.clone(),
            last_done: None,
            active_child_executors: VecDeque::new(),
            combine_child_results: concat.combine_inners.clone(),
            combine_with_child_result: concat.combine_all.clone(),
            on_pull: concat.on_pull.clone(),
            on_emit: concat.on_emit.clone(),
        }));
        self.close_last_substream = None;
    }

    pub(crate) fn run_subexecutor(
        &mut self,
        this: &ChannelExecutor,
        subexecutor: Subexecutor,
    ) -> Option<ChannelState> {
        match subexecutor {
            Subexecutor::PullFromUpstream(state) => self.pull_from_upstream(this, state),
            Subexecutor::DrainChildExecutors(state) => self.drain_child_executors(this, state),
            Subexecutor::PullFromChild(state) => Some(self.pull_from_child(this, state)),
            Subexecutor::Emit { value, next } => {
                self.emitted = Some(value);
                self.cursor = Cursor::Subexecutor(*next);
                Some(ChannelState::Emit)
            }
        }
    }

    fn replace_subexecutor(&mut self, next: Subexecutor) {
        self.cursor = Cursor::Subexecutor(next);
    }

    /// Wrap the current sub-executor so `value` is emitted before it resumes
    fn stage_emit(&mut self, value: Val) {
        match std::mem::replace(&mut self.cursor, Cursor::Idle) {
            Cursor::Subexecutor(next) => {
                self.cursor = Cursor::Subexecutor(Subexecutor::Emit {
                    value,
                    next: Box::new(next),
                });
            }
            other => {
                trace!("Dropping child element; concat already finished");
                self.cursor = other;
            }
        }
    }

    /// Take the pending child close, routed through this executor's close hook
    fn take_pending_close(&mut self) -> Option<Effect> {
        let pending = self.close_last_substream.take()?;
        Some((self.execute_close_last_substream)(pending))
    }

    /* ===================== Upstream ===================== */

    fn pull_from_upstream(
        &mut self,
        this: &ChannelExecutor,
        mut state: PullFromUpstream,
    ) -> Option<ChannelState> {
        match state.active_child_executors.pop_front() {
            Some(Some(child)) => {
                self.replace_subexecutor(Subexecutor::PullFromChild(PullFromChild {
                    child,
                    parent: Box::new(Subexecutor::PullFromUpstream(state)),
                }));
                None
            }
            Some(None) | None => Some(self.perform_pull_from_upstream(this, state)),
        }
    }

    fn perform_pull_from_upstream(
        &mut self,
        this: &ChannelExecutor,
        state: PullFromUpstream,
    ) -> ChannelState {
        self.replace_subexecutor(Subexecutor::PullFromUpstream(state.clone()));
        let upstream = state.upstream_executor.clone();

        let on_effect: OnEffect = {
            let this = this.clone();
            Arc::new(move |effect: Effect| {
                let pending = this.lock().take_pending_close();
                match pending {
                    Some(close) => close.zip_right(effect),
                    None => effect,
                }
            })
        };

        let on_emit: OnReadEmit = {
            let this = this.clone();
            let state = state.clone();
            Arc::new(move |value: Val| -> Option<Effect> {
                let pending = this.lock().take_pending_close();
                match pending {
                    Some(close) => {
                        let this = this.clone();
                        let state = state.clone();
                        Some(close.zip_right(Effect::suspend(move || {
                            this.resume_with(move |executor, this| {
                                executor.spawn_child(this, state, value)
                            })
                        })))
                    }
                    None => {
                        let next = this.lock().spawn_child(&this, state.clone(), value);
                        next.and_then(ChannelState::into_effect)
                    }
                }
            })
        };

        let on_done: OnReadDone = {
            let this = this.clone();
            Arc::new(move |exit: Exit| -> Option<Effect> {
                let mut executor = this.lock();
                executor.upstream_finished(&this, state.clone(), exit)
            })
        };

        ChannelState::Read(ReadRequest::new(Some(upstream), on_emit, on_done).with_on_effect(on_effect))
    }

    /// Spawn a child for `value` and apply the pull policy
    fn spawn_child(
        &mut self,
        this: &ChannelExecutor,
        mut state: PullFromUpstream,
        value: Val,
    ) -> Option<ChannelState> {
        let create_child = state.create_child.clone();
        let pulled = value.clone();
        let child_channel =
            catch_defect(move || create_child(value)).unwrap_or_else(Channel::fail_cause);
        let strategy = match catch_defect(|| (state.on_pull)(UpstreamPullRequest::Pulled(pulled))) {
            Ok(strategy) => strategy,
            Err(defect) => {
                return self.fail_subexecutor(this, Subexecutor::PullFromUpstream(state), defect);
            }
        };

        let child = ChannelExecutor::new(
            child_channel,
            self.provided_env.clone(),
            self.execute_close_last_substream.clone(),
        );
        child.set_input(self.input.clone());
        trace!(executor = this.id(), child = child.id(), "Spawned concat child");

        let queue = std::mem::take(&mut state.active_child_executors);
        let (separator, queue) = apply_upstream_pull_strategy(false, queue, strategy);
        state.active_child_executors = queue;

        let on_emit = state.on_emit.clone();
        let mut next = Subexecutor::PullFromChild(PullFromChild {
            child: ChildHandle {
                executor: child,
                on_emit,
            },
            parent: Box::new(Subexecutor::PullFromUpstream(state)),
        });
        if let Some(separator) = separator {
            next = Subexecutor::Emit {
                value: separator,
                next: Box::new(next),
            };
        }
        self.replace_subexecutor(next);
        None
    }

    fn upstream_finished(
        &mut self,
        this: &ChannelExecutor,
        state: PullFromUpstream,
        exit: Exit,
    ) -> Option<Effect> {
        if state.active_child_executors.iter().any(Option::is_some) {
            let mut queue = state.active_child_executors;
            queue.push_front(None);
            debug!(executor = this.id(), queued = queue.len() - 1, "Upstream finished; draining children");
            let drain = Subexecutor::DrainChildExecutors(DrainChildExecutors {
                upstream_executor: state.upstream_executor,
                last_done: state.last_done,
                active_child_executors: queue,
                upstream_done: exit,
                combine_child_results: state.combine_child_results,
                combine_with_child_result: state.combine_with_child_result,
                on_pull: state.on_pull,
            });
            return match self.take_pending_close() {
                Some(close) => {
                    let this = this.clone();
                    Some(close.zip_right(Effect::sync(move || {
                        this.lock().replace_subexecutor(drain);
                        Val::Unit
                    })))
                }
                None => {
                    self.replace_subexecutor(drain);
                    None
                }
            };
        }

        let last_close = self.close_last_substream.take();
        let done = combine_upstream(&state.combine_with_child_result, state.last_done, exit);
        let upstream = state.upstream_executor;
        let close_fns: Vec<CloseFn> = vec![
            Box::new(move |_: &Exit| last_close),
            Box::new(move |exit: &Exit| upstream.close(exit)),
        ];
        self.finish_subexecutor_with_close_effect(this, done, close_fns)
            .and_then(ChannelState::into_effect)
    }

    /* ===================== Children ===================== */

    fn pull_from_child(&mut self, this: &ChannelExecutor, state: PullFromChild) -> ChannelState {
        self.replace_subexecutor(Subexecutor::PullFromChild(state.clone()));
        let upstream = state.child.executor.clone();

        let on_emit: OnReadEmit = {
            let this = this.clone();
            let state = state.clone();
            Arc::new(move |value: Val| -> Option<Effect> {
                let decision = catch_defect(|| (state.child.on_emit)(&value));
                let mut executor = this.lock();
                let parent = (*state.parent).clone();
                let child = &state.child;
                match decision {
                    Ok(ChildExecutorDecision::Continue) => {}
                    Ok(ChildExecutorDecision::Close(done)) => {
                        if let Some(next) = executor.finish_with_done_value(&this, &child.executor, parent, done) {
                            return next.into_effect();
                        }
                    }
                    Ok(ChildExecutorDecision::Yield) => {
                        executor.replace_subexecutor(parent.enqueue_pull_from_child(child.clone()));
                    }
                    Err(defect) => {
                        return executor
                            .handle_subexecutor_failure(&this, &child.executor, parent, defect)
                            .and_then(ChannelState::into_effect);
                    }
                }
                executor.stage_emit(value);
                None
            })
        };

        let on_done: OnReadDone = {
            let this = this.clone();
            Arc::new(move |exit: Exit| -> Option<Effect> {
                let mut executor = this.lock();
                let parent = (*state.parent).clone();
                let next = match exit {
                    Exit::Failure(cause) => {
                        executor.handle_subexecutor_failure(&this, &state.child.executor, parent, cause)
                    }
                    Exit::Success(done) => {
                        executor.finish_with_done_value(&this, &state.child.executor, parent, done)
                    }
                };
                next.and_then(ChannelState::into_effect)
            })
        };

        ChannelState::Read(ReadRequest::new(Some(upstream), on_emit, on_done))
    }

    /// Record a finished child and go back to the parent state
    fn finish_with_done_value(
        &mut self,
        this: &ChannelExecutor,
        child: &ChannelExecutor,
        parent: Subexecutor,
        done: Val,
    ) -> Option<ChannelState> {
        let close = child.close(&Exit::Success(done.clone()));
        match parent {
            Subexecutor::PullFromUpstream(mut state) => {
                match combine_done(&state.combine_child_results, state.last_done.take(), done) {
                    Ok(combined) => state.last_done = Some(combined),
                    Err(defect) => {
                        let parent = Subexecutor::PullFromUpstream(state);
                        return self.handle_subexecutor_failure(this, child, parent, defect);
                    }
                }
                let pending = self.close_last_substream.take();
                self.close_last_substream = append_close(pending, close);
                self.replace_subexecutor(Subexecutor::PullFromUpstream(state));
            }
            Subexecutor::DrainChildExecutors(mut state) => {
                match combine_done(&state.combine_child_results, state.last_done.take(), done) {
                    Ok(combined) => state.last_done = Some(combined),
                    Err(defect) => {
                        let parent = Subexecutor::DrainChildExecutors(state);
                        return self.handle_subexecutor_failure(this, child, parent, defect);
                    }
                }
                let pending = self.close_last_substream.take();
                self.close_last_substream = append_close(pending, close);
                self.replace_subexecutor(Subexecutor::DrainChildExecutors(state));
            }
            other => self.replace_subexecutor(other),
        }
        None
    }

    fn handle_subexecutor_failure(
        &mut self,
        this: &ChannelExecutor,
        child: &ChannelExecutor,
        parent: Subexecutor,
        cause: Cause,
    ) -> Option<ChannelState> {
        debug!(executor = this.id(), child = child.id(), "Concat child failed");
        let child = child.clone();
        let close_fns: Vec<CloseFn> = vec![
            Box::new(move |exit: &Exit| parent.close(exit)),
            Box::new(move |exit: &Exit| child.close(exit)),
        ];
        self.finish_subexecutor_with_close_effect(this, Exit::Failure(cause), close_fns)
    }

    /// A policy callback panicked; fail the whole concat
    fn fail_subexecutor(
        &mut self,
        this: &ChannelExecutor,
        subexecutor: Subexecutor,
        defect: Cause,
    ) -> Option<ChannelState> {
        let close_fns: Vec<CloseFn> = vec![Box::new(move |exit: &Exit| subexecutor.close(exit))];
        self.finish_subexecutor_with_close_effect(this, Exit::Failure(defect), close_fns)
    }

    /// End the concat with `done`, leaving a finalizer that closes what it used
    fn finish_subexecutor_with_close_effect(
        &mut self,
        this: &ChannelExecutor,
        done: Exit,
        close_fns: Vec<CloseFn>,
    ) -> Option<ChannelState> {
        let subexecutor_done = done.clone();
        self.done_stack
            .push_finalizer(Finalizer::new(move |_| {
                Effect::from_fn(move |ctx| async move {
                    let mut outcomes = Vec::with_capacity(close_fns.len());
                    for close in close_fns {
                        let effect = catch_defect(|| close(&subexecutor_done))
                            .unwrap_or_else(|defect| Some(Effect::fail_cause(defect)));
                        if let Some(effect) = effect {
                            outcomes.push(effect.run(ctx.clone()).await);
                        }
                    }
                    Exit::all(outcomes)
                })
            }));
        self.cursor = Cursor::Idle;
        match done {
            Exit::Success(value) => self.done_succeed(this, value),
            Exit::Failure(cause) => self.done_halt(this, cause),
        }
    }

    /* ===================== Draining ===================== */

    fn drain_child_executors(
        &mut self,
        this: &ChannelExecutor,
        mut state: DrainChildExecutors,
    ) -> Option<ChannelState> {
        match state.active_child_executors.pop_front() {
            None => {
                let last_close = self.close_last_substream.take();
                let done = combine_upstream(
                    &state.combine_with_child_result,
                    state.last_done,
                    state.upstream_done,
                );
                let upstream = state.upstream_executor;
                let close_fns: Vec<CloseFn> = vec![
                    Box::new(move |_: &Exit| last_close),
                    Box::new(move |exit: &Exit| upstream.close(exit)),
                ];
                self.finish_subexecutor_with_close_effect(this, done, close_fns)
            }
            Some(None) => {
                let remaining = state.active_child_executors.iter().flatten().count();
                let strategy = match catch_defect(|| (state.on_pull)(UpstreamPullRequest::NoUpstream(remaining))) {
                    Ok(strategy) => strategy,
                    Err(defect) => {
                        return self.fail_subexecutor(this, Subexecutor::DrainChildExecutors(state), defect);
                    }
                };
                let queue = std::mem::take(&mut state.active_child_executors);
                let (separator, queue) = apply_upstream_pull_strategy(true, queue, strategy);
                state.active_child_executors = queue;
                self.replace_subexecutor(Subexecutor::DrainChildExecutors(state));
                separator.map(|value| {
                    self.emitted = Some(value);
                    ChannelState::Emit
                })
            }
            Some(Some(child)) => {
                self.replace_subexecutor(Subexecutor::PullFromChild(PullFromChild {
                    child,
                    parent: Box::new(Subexecutor::DrainChildExecutors(state)),
                }));
                None
            }
        }
    }
}
