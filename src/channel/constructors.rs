//! Building channels
//!
//! Every constructor returns a new [`Channel`]; nothing runs until the channel
//! is handed to an executor. Callbacks may be called more than once (a
//! channel can be run many times), so they are `Fn`.

use parking_lot::Mutex;
use std::sync::Arc;

use super::bridge::BridgeInput;
use super::types::instruction::ConcatAll;
use super::types::{
    Channel, ChildExecutorDecision, ContinuationK, Instruction, UpstreamPullRequest,
    UpstreamPullStrategy,
};
use crate::effect::{Cause, Context, Effect, Exit};
use crate::types::Val;

/* ===================== Leaves ===================== */

impl Channel {
    pub fn emit(value: impl Into<Val>) -> Channel {
        Channel::new(Instruction::Emit(value.into()))
    }

    /// Emit each value in order, then finish with unit
    pub fn write_all<I, V>(values: I) -> Channel
    where
        I: IntoIterator<Item = V>,
        V: Into<Val>,
    {
        let values: Arc<Vec<Val>> = Arc::new(values.into_iter().map(Into::into).collect());
        Self::write_from(values, 0)
    }

    fn write_from(values: Arc<Vec<Val>>, index: usize) -> Channel {
        let next = values.get(index).cloned();
        match next {
            Some(value) => Channel::emit(value)
                .flat_map(move |_| Self::write_from(values.clone(), index + 1)),
            None => Channel::unit(),
        }
    }

    pub fn succeed_now(value: impl Into<Val>) -> Channel {
        Channel::new(Instruction::SucceedNow(value.into()))
    }

    /// Finish with a value computed each time the channel runs
    pub fn succeed<F>(f: F) -> Channel
    where
        F: Fn() -> Val + Send + Sync + 'static,
    {
        Channel::new(Instruction::Succeed(Arc::new(f)))
    }

    pub fn unit() -> Channel {
        Channel::succeed_now(Val::Unit)
    }

    pub fn fail(error: impl Into<Val>) -> Channel {
        Channel::fail_cause(Cause::fail(error))
    }

    pub fn fail_cause(cause: Cause) -> Channel {
        Channel::new(Instruction::Fail(Arc::new(move || cause.clone())))
    }

    pub fn die(message: impl Into<String>) -> Channel {
        Channel::fail_cause(Cause::defect(message))
    }

    /// Run the effect built by `f` and finish with its outcome
    pub fn from_effect<F>(f: F) -> Channel
    where
        F: Fn() -> Effect + Send + Sync + 'static,
    {
        Channel::new(Instruction::FromEffect(Arc::new(f)))
    }

    /// Build the channel lazily, each time it runs
    pub fn suspend<F>(f: F) -> Channel
    where
        F: Fn() -> Channel + Send + Sync + 'static,
    {
        Channel::new(Instruction::Suspend(Arc::new(f)))
    }

    /* ===================== Reading ===================== */

    /// Read one element from upstream
    ///
    /// `more` receives the element; `on_halt` and `on_done` receive upstream's
    /// failure or done value.
    pub fn read_with<M, H, D>(more: M, on_halt: H, on_done: D) -> Channel
    where
        M: Fn(Val) -> Channel + Send + Sync + 'static,
        H: Fn(Cause) -> Channel + Send + Sync + 'static,
        D: Fn(Val) -> Channel + Send + Sync + 'static,
    {
        Channel::new(Instruction::Read {
            more: Arc::new(more),
            done: ContinuationK {
                on_success: Arc::new(on_done),
                on_halt: Arc::new(on_halt),
            },
        })
    }

    /// Re-emit every upstream element and finish with upstream's outcome
    pub fn identity() -> Channel {
        Channel::read_with(
            |value| Channel::emit(value).flat_map(|_| Channel::identity()),
            Channel::fail_cause,
            |done| Channel::succeed_now(done),
        )
    }

    /* ===================== Sequencing ===================== */

    pub fn fold_cause<H, S>(self, on_halt: H, on_success: S) -> Channel
    where
        H: Fn(Cause) -> Channel + Send + Sync + 'static,
        S: Fn(Val) -> Channel + Send + Sync + 'static,
    {
        Channel::new(Instruction::Fold {
            inner: self,
            k: ContinuationK {
                on_success: Arc::new(on_success),
                on_halt: Arc::new(on_halt),
            },
        })
    }

    pub fn flat_map<F>(self, f: F) -> Channel
    where
        F: Fn(Val) -> Channel + Send + Sync + 'static,
    {
        self.fold_cause(Channel::fail_cause, f)
    }

    /// Continue with `next` after `self` succeeds
    pub fn then(self, next: Channel) -> Channel {
        self.flat_map(move |_| next.clone())
    }

    pub fn map<F>(self, f: F) -> Channel
    where
        F: Fn(Val) -> Val + Send + Sync + 'static,
    {
        self.flat_map(move |value| Channel::succeed_now(f(value)))
    }

    pub fn catch_all_cause<F>(self, f: F) -> Channel
    where
        F: Fn(Cause) -> Channel + Send + Sync + 'static,
    {
        self.fold_cause(f, |value| Channel::succeed_now(value))
    }

    /* ===================== Resources ===================== */

    /// Run `finalizer` with the outcome once `self` ends, however it ends
    pub fn ensuring_with<F>(self, finalizer: F) -> Channel
    where
        F: Fn(&Exit) -> Effect + Send + Sync + 'static,
    {
        Channel::new(Instruction::Ensuring {
            inner: self,
            finalizer: Arc::new(finalizer),
        })
    }

    pub fn ensuring<F>(self, finalizer: F) -> Channel
    where
        F: Fn() -> Effect + Send + Sync + 'static,
    {
        self.ensuring_with(move |_: &Exit| finalizer())
    }

    /// Acquire a resource, emit it, and release it when the channel ends
    pub fn acquire_release_out<A, R>(acquire: A, release: R) -> Channel
    where
        A: Fn() -> Effect + Send + Sync + 'static,
        R: Fn(Val, &Exit) -> Effect + Send + Sync + 'static,
    {
        Channel::new(Instruction::BracketOut {
            acquire: Arc::new(acquire),
            release: Arc::new(release),
        })
    }

    /// Run the effects of `self` under `context`
    pub fn provide_context(self, context: Context) -> Channel {
        Channel::new(Instruction::Provide {
            context,
            inner: self,
        })
    }

    /* ===================== Composition ===================== */

    /// Feed the elements of `self` into `that`
    pub fn pipe_to(self, that: Channel) -> Channel {
        Channel::new(Instruction::PipeTo {
            left: self,
            right: that,
        })
    }

    /// Let `self` read its input from `input` instead of its upstream
    pub fn embed_input(self, input: BridgeInput) -> Channel {
        Channel::new(Instruction::Bridge { input, inner: self })
    }

    /// Turn each element into a child channel and merge the children
    pub fn concat_all_with<C, I, A, P, E>(
        self,
        create_child: C,
        combine_inners: I,
        combine_all: A,
        on_pull: P,
        on_emit: E,
    ) -> Channel
    where
        C: Fn(Val) -> Channel + Send + Sync + 'static,
        I: Fn(Val, Val) -> Val + Send + Sync + 'static,
        A: Fn(Val, Val) -> Val + Send + Sync + 'static,
        P: Fn(UpstreamPullRequest) -> UpstreamPullStrategy + Send + Sync + 'static,
        E: Fn(&Val) -> ChildExecutorDecision + Send + Sync + 'static,
    {
        Channel::new(Instruction::ConcatAll(ConcatAll {
            outer: self,
            create_child: Arc::new(create_child),
            combine_inners: Arc::new(combine_inners),
            combine_all: Arc::new(combine_all),
            on_pull: Arc::new(on_pull),
            on_emit: Arc::new(on_emit),
        }))
    }

    /// Children run one at a time, in upstream order; done values are dropped
    pub fn concat_map<F>(self, f: F) -> Channel
    where
        F: Fn(Val) -> Channel + Send + Sync + 'static,
    {
        self.concat_map_with(f, |_, _| Val::Unit, |_, _| Val::Unit)
    }

    pub fn concat_map_with<F, I, A>(self, f: F, combine_inners: I, combine_all: A) -> Channel
    where
        F: Fn(Val) -> Channel + Send + Sync + 'static,
        I: Fn(Val, Val) -> Val + Send + Sync + 'static,
        A: Fn(Val, Val) -> Val + Send + Sync + 'static,
    {
        self.concat_all_with(
            f,
            combine_inners,
            combine_all,
            |_| UpstreamPullStrategy::PullAfterNext(None),
            |_| ChildExecutorDecision::Continue,
        )
    }

    /* ===================== Stream helpers ===================== */

    /// Discard every element, keeping the done value
    pub fn drain(self) -> Channel {
        fn drainer() -> Channel {
            Channel::read_with(|_| drainer(), Channel::fail_cause, |done| Channel::succeed_now(done))
        }
        self.pipe_to(drainer())
    }

    /// Apply `f` to every element
    pub fn map_out<F>(self, f: F) -> Channel
    where
        F: Fn(Val) -> Val + Send + Sync + 'static,
    {
        fn mapper(f: Arc<dyn Fn(Val) -> Val + Send + Sync>) -> Channel {
            let next = f.clone();
            Channel::read_with(
                move |value| {
                    let next = next.clone();
                    Channel::emit(next(value)).flat_map(move |_| mapper(next.clone()))
                },
                Channel::fail_cause,
                |done| Channel::succeed_now(done),
            )
        }
        self.pipe_to(mapper(Arc::new(f)))
    }

    /// Finish with `[elements, done]` instead of emitting
    pub fn collect_elements(self) -> Channel {
        fn collector(builder: Arc<Mutex<Vec<Val>>>) -> Channel {
            let sink = builder.clone();
            Channel::read_with(
                move |value| {
                    sink.lock().push(value);
                    collector(sink.clone())
                },
                Channel::fail_cause,
                move |done| {
                    let elements = std::mem::take(&mut *builder.lock());
                    Channel::succeed_now(Val::List(vec![Val::List(elements), done]))
                },
            )
        }
        Channel::suspend(move || self.clone().pipe_to(collector(Arc::new(Mutex::new(Vec::new())))))
    }
}
