//! ChannelExecutor: the step interpreter
//!
//! ## Responsibilities
//! - Walk the instruction tree until the channel needs something from its caller
//! - Keep the continuation stack of `Fold` handlers and finalizers
//! - Hand out [`ChannelState`] signals: an element, an effect to run, a read
//!   against an upstream executor, or completion
//! - Release resources exactly once, whether the channel finishes, fails, or is
//!   closed from outside
//!
//! ## Locking
//! An executor is a cheap handle around `Arc<Mutex<ExecutorState>>`. The lock is
//! only held during a synchronous step and never across an await. When two
//! executors are locked together the reader is locked before its upstream or
//! children. State that outlives a step (finalizers on an executor's own stack,
//! close hooks stored in children) refers back through [`WeakExecutor`].

use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace};

use super::continuation::{self, ContinuationStack, Finalizer, InProgressFinalizer, Top};
use super::subexecutor::Subexecutor;
use super::types::instruction::ReleaseFn;
use super::types::{Channel, ChannelState, ContinuationK, Instruction, OnValue, ReadRequest};
use crate::effect::{catch_defect, Cause, Context, Effect, Exit};
use crate::errors;
use crate::types::Val;

/// Decides when a concat closes the child it just finished with
///
/// Top-level executors run the close right away. Executors created for a
/// concat's upstream defer it into the concat's pending close.
pub type CloseLastSubstream = Arc<dyn Fn(Effect) -> Effect + Send + Sync>;

pub fn identity_close_hook() -> CloseLastSubstream {
    Arc::new(|effect: Effect| effect)
}

static NEXT_EXECUTOR_ID: AtomicU64 = AtomicU64::new(1);

/* ===================== Handles ===================== */

#[derive(Clone)]
pub struct ChannelExecutor {
    id: u64,
    state: Arc<Mutex<ExecutorState>>,
}

/// Non-owning handle; used by anything stored inside the executor it points to
#[derive(Clone)]
pub(crate) struct WeakExecutor {
    id: u64,
    state: Weak<Mutex<ExecutorState>>,
}

impl WeakExecutor {
    pub(crate) fn upgrade(&self) -> Option<ChannelExecutor> {
        self.state.upgrade().map(|state| ChannelExecutor { id: self.id, state })
    }
}

/// What the executor interprets next
pub(crate) enum Cursor {
    Idle,
    Channel(Channel),
    Subexecutor(Subexecutor),
}

pub(crate) struct ExecutorState {
    pub(crate) cursor: Cursor,
    pub(crate) cancelled: Option<Exit>,
    /// Close of the concat child that finished last, run before the next pull
    pub(crate) close_last_substream: Option<Effect>,
    pub(crate) done: Option<Exit>,
    pub(crate) done_stack: ContinuationStack,
    pub(crate) emitted: Option<Val>,
    pub(crate) execute_close_last_substream: CloseLastSubstream,
    pub(crate) input: Option<ChannelExecutor>,
    pub(crate) in_progress_finalizer: Option<InProgressFinalizer>,
    pub(crate) provided_env: Option<Context>,
}

impl ChannelExecutor {
    pub fn new(
        channel: Channel,
        provided_env: Option<Context>,
        execute_close_last_substream: CloseLastSubstream,
    ) -> Self {
        let id = NEXT_EXECUTOR_ID.fetch_add(1, Ordering::Relaxed);
        trace!(executor = id, root = channel.tag(), "Created executor");
        ChannelExecutor {
            id,
            state: Arc::new(Mutex::new(ExecutorState {
                cursor: Cursor::Channel(channel),
                cancelled: None,
                close_last_substream: None,
                done: None,
                done_stack: ContinuationStack::default(),
                emitted: None,
                execute_close_last_substream,
                input: None,
                in_progress_finalizer: None,
                provided_env,
            })),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Step until the channel needs its caller
    ///
    /// A channel built only from pure instructions reaches `Done` in one call.
    pub fn run(&self) -> ChannelState {
        let mut state = self.lock();
        state.run_loop(self)
    }

    /// The element behind the latest `Emit` signal
    pub fn emitted(&self) -> Option<Val> {
        self.lock().emitted.clone()
    }

    pub fn done(&self) -> Option<Exit> {
        self.lock().done.clone()
    }

    /// Make the next `run` finish with `exit` instead of stepping further
    pub fn cancel_with(&self, exit: Exit) {
        debug!(executor = self.id, "Cancelling executor");
        self.lock().cancelled = Some(exit);
    }

    /// Build the effect releasing everything this executor still holds
    ///
    /// Covers the active concat's children and upstream, a cleanup that is
    /// already running, and every finalizer left on the stack. Returns `None`
    /// when there is nothing to release. The effect is uninterruptible and
    /// reports every failure it meets.
    pub fn close(&self, exit: &Exit) -> Option<Effect> {
        let (subexecutor, in_progress, own) = {
            let mut state = self.lock();
            let subexecutor = match &state.cursor {
                Cursor::Subexecutor(subexecutor) => Some(subexecutor.clone()),
                _ => None,
            };
            let in_progress = state.in_progress_finalizer.clone();
            let own = state.pop_all_finalizers(self, exit);
            (subexecutor, in_progress, own)
        };
        let close_subexecutor = subexecutor.and_then(|subexecutor| subexecutor.close(exit));
        let wait_in_progress = in_progress.map(|in_progress| in_progress.effect());

        if close_subexecutor.is_none() && wait_in_progress.is_none() && own.is_none() {
            return None;
        }
        debug!(executor = self.id, "Closing executor");

        // Finalizers reach this executor through weak handles, so the close
        // holds a strong one until they have all run
        let this = self.clone();
        let parts = [close_subexecutor, wait_in_progress, own];
        Some(
            Effect::from_fn(move |ctx| async move {
                let mut outcome = Exit::unit();
                for effect in parts.into_iter().flatten() {
                    outcome = outcome.zip_par_right(effect.run(ctx.clone()).await);
                }
                trace!(executor = this.id(), success = outcome.is_success(), "Executor closed");
                outcome.map(|_| Val::Unit)
            })
            .uninterruptible(),
        )
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ExecutorState> {
        self.state.lock()
    }

    pub(crate) fn downgrade(&self) -> WeakExecutor {
        WeakExecutor {
            id: self.id,
            state: Arc::downgrade(&self.state),
        }
    }

    pub(crate) fn set_input(&self, input: Option<ChannelExecutor>) {
        self.lock().input = input;
    }

    /// Put `previous` back as the input and close whatever was piped in
    pub(crate) fn restore_pipe(&self, exit: &Exit, previous: Option<ChannelExecutor>) -> Option<Effect> {
        let current = std::mem::replace(&mut self.lock().input, previous);
        current.and_then(|input| input.close(exit))
    }

    /// Apply `step` under the lock, then return the effect it suspends on
    pub(crate) fn resume_with<F>(&self, step: F) -> Effect
    where
        F: FnOnce(&mut ExecutorState, &ChannelExecutor) -> Option<ChannelState>,
    {
        let next = {
            let mut state = self.lock();
            step(&mut state, self)
        };
        next.and_then(ChannelState::into_effect)
            .unwrap_or_else(Effect::unit)
    }
}

/* ===================== Interpretation ===================== */

impl ExecutorState {
    fn run_loop(&mut self, this: &ChannelExecutor) -> ChannelState {
        loop {
            if let Some(exit) = self.cancelled.clone() {
                return self.process_cancellation(this, exit);
            }
            let next = match std::mem::replace(&mut self.cursor, Cursor::Idle) {
                Cursor::Idle => Some(self.idle_state()),
                Cursor::Subexecutor(subexecutor) => {
                    trace!(executor = this.id(), state = subexecutor.name(), "Stepping sub-executor");
                    self.run_subexecutor(this, subexecutor)
                }
                Cursor::Channel(channel) => self.interpret(this, channel),
            };
            if let Some(state) = next {
                return state;
            }
        }
    }

    /// The cursor is left in place so `close` still reaches a running concat
    fn process_cancellation(&mut self, this: &ChannelExecutor, exit: Exit) -> ChannelState {
        trace!(executor = this.id(), "Executor observed cancellation");
        self.done = Some(exit.clone());
        ChannelState::Done(exit)
    }

    fn idle_state(&self) -> ChannelState {
        ChannelState::Done(self.done.clone().unwrap_or_else(|| {
            Exit::die(errors::MISSING_DONE, "executor stepped after it stopped without an exit")
        }))
    }

    fn interpret(&mut self, this: &ChannelExecutor, channel: Channel) -> Option<ChannelState> {
        trace!(executor = this.id(), instruction = channel.tag(), depth = self.done_stack.len(), "Interpreting");
        match channel.instruction() {
            Instruction::Emit(value) => {
                self.emitted = Some(value.clone());
                self.cursor = Cursor::Channel(Channel::unit());
                Some(ChannelState::Emit)
            }
            Instruction::SucceedNow(value) => self.done_succeed(this, value.clone()),
            Instruction::Succeed(thunk) => match catch_defect(|| thunk()) {
                Ok(value) => self.done_succeed(this, value),
                Err(defect) => self.done_halt(this, defect),
            },
            Instruction::Fail(thunk) => {
                let cause = catch_defect(|| thunk()).unwrap_or_else(|defect| defect);
                self.done_halt(this, cause)
            }
            Instruction::Suspend(thunk) => {
                self.continue_with(catch_defect(|| thunk()));
                None
            }
            Instruction::Fold { inner, k } => {
                self.done_stack.push_k(k.clone());
                self.cursor = Cursor::Channel(inner.clone());
                None
            }
            Instruction::Ensuring { inner, finalizer } => {
                let finalizer = finalizer.clone();
                self.done_stack
                    .push_finalizer(Finalizer::new(move |exit| finalizer(exit)));
                self.cursor = Cursor::Channel(inner.clone());
                None
            }
            Instruction::FromEffect(thunk) => match catch_defect(|| thunk()) {
                Ok(effect) => Some(ChannelState::FromEffect(self.resume_after(this, effect))),
                Err(defect) => {
                    self.cursor = Cursor::Channel(Channel::fail_cause(defect));
                    None
                }
            },
            Instruction::Read { more, done } => Some(self.read(this, more.clone(), done.clone())),
            Instruction::PipeTo { left, right } => {
                self.pipe_to(this, left.clone(), right.clone());
                None
            }
            Instruction::Provide { context, inner } => {
                let previous = self.provided_env.replace(context.clone());
                let weak = this.downgrade();
                self.done_stack.push_finalizer(Finalizer::new(move |_| {
                    Effect::sync(move || {
                        if let Some(this) = weak.upgrade() {
                            this.lock().provided_env = previous;
                        }
                        Val::Unit
                    })
                }));
                self.cursor = Cursor::Channel(inner.clone());
                None
            }
            Instruction::BracketOut { acquire, release } => {
                let acquire = match catch_defect(|| acquire()) {
                    Ok(effect) => effect,
                    Err(defect) => {
                        self.cursor = Cursor::Channel(Channel::fail_cause(defect));
                        return None;
                    }
                };
                Some(ChannelState::FromEffect(self.bracket_out(this, acquire, release.clone())))
            }
            Instruction::ConcatAll(concat) => {
                self.concat_all(this, concat);
                None
            }
            Instruction::Bridge { input, inner } => self.bridge(this, input.clone(), inner.clone()),
        }
    }

    /// Point the cursor at `next`, or at a failure if building it panicked
    pub(crate) fn continue_with(&mut self, next: Result<Channel, Cause>) {
        self.cursor = Cursor::Channel(next.unwrap_or_else(Channel::fail_cause));
    }

    pub(crate) fn provide(&self, effect: Effect) -> Effect {
        match &self.provided_env {
            Some(ctx) => effect.provide(ctx.clone()),
            None => effect,
        }
    }

    /// Run `effect`, then resume this executor with its outcome
    fn resume_after(&self, this: &ChannelExecutor, effect: Effect) -> Effect {
        let on_failure = this.clone();
        let on_success = this.clone();
        self.provide(effect).match_cause_effect(
            move |cause| on_failure.resume_with(move |state, this| state.done_halt(this, cause)),
            move |value| on_success.resume_with(move |state, this| state.done_succeed(this, value)),
        )
    }

    fn read(&self, this: &ChannelExecutor, more: OnValue, done: ContinuationK) -> ChannelState {
        let on_emit = {
            let this = this.clone();
            let done = done.clone();
            Arc::new(move |value: Val| -> Option<Effect> {
                let next = match catch_defect(|| more(value)) {
                    Ok(channel) => Ok(channel),
                    Err(defect) => catch_defect(|| done.on_exit(Exit::Failure(defect))),
                };
                this.lock().continue_with(next);
                None
            })
        };
        let on_done = {
            let this = this.clone();
            Arc::new(move |exit: Exit| -> Option<Effect> {
                let next = catch_defect(|| done.on_exit(exit));
                this.lock().continue_with(next);
                None
            })
        };
        ChannelState::Read(ReadRequest::new(self.input.clone(), on_emit, on_done))
    }

    fn pipe_to(&mut self, this: &ChannelExecutor, left: Channel, right: Channel) {
        let previous = self.input.take();
        let left_executor = ChannelExecutor::new(
            left,
            self.provided_env.clone(),
            self.execute_close_last_substream.clone(),
        );
        left_executor.set_input(previous.clone());
        trace!(executor = this.id(), upstream = left_executor.id(), "Piping");
        self.input = Some(left_executor);

        let weak = this.downgrade();
        self.done_stack.push_finalizer(Finalizer::new(move |exit| {
            weak.upgrade()
                .and_then(|this| this.restore_pipe(exit, previous))
                .unwrap_or_else(Effect::unit)
        }));
        self.cursor = Cursor::Channel(right);
    }

    /// Acquire without interruption, then register the release before emitting
    fn bracket_out(
        &self,
        this: &ChannelExecutor,
        acquire: Effect,
        release: ReleaseFn,
    ) -> Effect {
        let on_failure = this.clone();
        let on_success = this.clone();
        self.provide(acquire)
            .match_cause_effect(
                move |cause| {
                    Effect::sync(move || {
                        on_failure.lock().cursor = Cursor::Channel(Channel::fail_cause(cause));
                        Val::Unit
                    })
                },
                move |resource| {
                    Effect::sync(move || {
                        let mut state = on_success.lock();
                        let env = state.provided_env.clone();
                        let acquired = resource.clone();
                        state.done_stack.push_finalizer(Finalizer::new(move |exit| {
                            let effect = release(acquired, exit);
                            match env {
                                Some(ctx) => effect.provide(ctx),
                                None => effect,
                            }
                        }));
                        state.cursor = Cursor::Channel(Channel::emit(resource));
                        Val::Unit
                    })
                },
            )
            .uninterruptible()
    }

    /* ===================== Completion ===================== */

    fn finish(&mut self, exit: Exit) -> ChannelState {
        self.done = Some(exit.clone());
        self.cursor = Cursor::Idle;
        ChannelState::Done(exit)
    }

    pub(crate) fn done_succeed(&mut self, this: &ChannelExecutor, value: Val) -> Option<ChannelState> {
        match self.done_stack.top() {
            None => return Some(self.finish(Exit::Success(value))),
            Some(Top::K) => {
                if let Some(k) = self.done_stack.pop_k() {
                    self.continue_with(catch_defect(move || (k.on_success)(value)));
                }
                return None;
            }
            Some(Top::Finalizer) => {}
        }

        let finalizers = self.done_stack.pop_next_finalizers();
        if self.done_stack.is_empty() {
            // leave them for close
            self.done_stack.restore_finalizers(finalizers);
            return Some(self.finish(Exit::Success(value)));
        }
        let exit = Exit::Success(value.clone());
        let cleanup = self.run_in_progress(this, continuation::run_finalizers(finalizers, exit));
        let this = this.clone();
        Some(ChannelState::FromEffect(cleanup.flat_map(move |_| {
            this.resume_with(move |state, this| state.done_succeed(this, value))
        })))
    }

    pub(crate) fn done_halt(&mut self, this: &ChannelExecutor, cause: Cause) -> Option<ChannelState> {
        match self.done_stack.top() {
            None => return Some(self.finish(Exit::Failure(cause))),
            Some(Top::K) => {
                if let Some(k) = self.done_stack.pop_k() {
                    self.continue_with(catch_defect(move || (k.on_halt)(cause)));
                }
                return None;
            }
            Some(Top::Finalizer) => {}
        }

        let finalizers = self.done_stack.pop_next_finalizers();
        if self.done_stack.is_empty() {
            self.done_stack.restore_finalizers(finalizers);
            return Some(self.finish(Exit::Failure(cause)));
        }
        let exit = Exit::Failure(cause.clone());
        let cleanup = self.run_in_progress(this, continuation::run_finalizers(finalizers, exit));
        let this = this.clone();
        Some(ChannelState::FromEffect(cleanup.flat_map(move |_| {
            this.resume_with(move |state, this| state.done_halt(this, cause))
        })))
    }

    /// Pop every finalizer into a single cleanup effect
    fn pop_all_finalizers(&mut self, this: &ChannelExecutor, exit: &Exit) -> Option<Effect> {
        let finalizers = self.done_stack.pop_all_finalizers();
        if finalizers.is_empty() {
            return None;
        }
        Some(self.run_in_progress(this, continuation::run_finalizers(finalizers, exit.clone())))
    }

    /// Record `cleanup` as in progress so a concurrent `close` waits for it
    /// instead of running the same finalizers again
    fn run_in_progress(&mut self, this: &ChannelExecutor, cleanup: Effect) -> Effect {
        let in_progress = InProgressFinalizer::new(cleanup);
        self.in_progress_finalizer = Some(in_progress.clone());
        let weak = this.downgrade();
        let finished = in_progress.clone();
        in_progress.effect().ensuring(Effect::sync(move || {
            if let Some(this) = weak.upgrade() {
                let mut state = this.lock();
                if state
                    .in_progress_finalizer
                    .as_ref()
                    .is_some_and(|current| current.is_same(&finished))
                {
                    state.in_progress_finalizer = None;
                }
            }
            Val::Unit
        }))
    }
}
