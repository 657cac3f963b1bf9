//! The per-executor continuation stack
//!
//! Entries are either a `Fold` continuation or a finalizer. Finalizers are
//! stored as plain closures and only invoked when the effect that runs them
//! is itself run, so building a cleanup effect never touches executor state.

use parking_lot::Mutex;
use std::sync::Arc;

use super::types::ContinuationK;
use crate::effect::{catch_defect, Deferred, Effect, Exit};

/* ===================== Finalizers ===================== */

pub(crate) struct Finalizer(Box<dyn FnOnce(&Exit) -> Effect + Send>);

impl Finalizer {
    pub(crate) fn new<F>(f: F) -> Self
    where
        F: FnOnce(&Exit) -> Effect + Send + 'static,
    {
        Finalizer(Box::new(f))
    }

    /// Build the cleanup effect; a panicking finalizer becomes a failed effect
    pub(crate) fn invoke(self, exit: &Exit) -> Effect {
        let f = self.0;
        match catch_defect(move || f(exit)) {
            Ok(effect) => effect,
            Err(cause) => Effect::fail_cause(cause),
        }
    }
}

/// Run `finalizers` one after another, in the given order
///
/// Every finalizer runs even when an earlier one fails. The result is unit, or
/// the failures combined sequentially.
pub(crate) fn run_finalizers(finalizers: Vec<Finalizer>, exit: Exit) -> Effect {
    Effect::from_fn(move |ctx| async move {
        let mut outcomes = Vec::with_capacity(finalizers.len());
        for finalizer in finalizers {
            outcomes.push(finalizer.invoke(&exit).run(ctx.clone()).await);
        }
        Exit::all(outcomes)
    })
}

/* ===================== Stack ===================== */

pub(crate) enum Continuation {
    K(ContinuationK),
    Finalizer(Finalizer),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Top {
    K,
    Finalizer,
}

#[derive(Default)]
pub(crate) struct ContinuationStack {
    entries: Vec<Continuation>,
}

impl ContinuationStack {
    pub(crate) fn push_k(&mut self, k: ContinuationK) {
        self.entries.push(Continuation::K(k));
    }

    pub(crate) fn push_finalizer(&mut self, finalizer: Finalizer) {
        self.entries.push(Continuation::Finalizer(finalizer));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn top(&self) -> Option<Top> {
        self.entries.last().map(|entry| match entry {
            Continuation::K(_) => Top::K,
            Continuation::Finalizer(_) => Top::Finalizer,
        })
    }

    /// Pop the top entry if it is a continuation
    pub(crate) fn pop_k(&mut self) -> Option<ContinuationK> {
        match self.entries.pop() {
            Some(Continuation::K(k)) => Some(k),
            Some(other) => {
                self.entries.push(other);
                None
            }
            None => None,
        }
    }

    /// Pop the run of finalizers above the nearest continuation, most recent first
    pub(crate) fn pop_next_finalizers(&mut self) -> Vec<Finalizer> {
        let mut finalizers = Vec::new();
        while let Some(Top::Finalizer) = self.top() {
            if let Some(Continuation::Finalizer(finalizer)) = self.entries.pop() {
                finalizers.push(finalizer);
            }
        }
        finalizers
    }

    /// Empty the stack, keeping only the finalizers, most recent first
    pub(crate) fn pop_all_finalizers(&mut self) -> Vec<Finalizer> {
        self.entries
            .drain(..)
            .rev()
            .filter_map(|entry| match entry {
                Continuation::Finalizer(finalizer) => Some(finalizer),
                Continuation::K(_) => None,
            })
            .collect()
    }

    /// Push back finalizers taken by [`pop_next_finalizers`](Self::pop_next_finalizers)
    pub(crate) fn restore_finalizers(&mut self, finalizers: Vec<Finalizer>) {
        for finalizer in finalizers.into_iter().rev() {
            self.push_finalizer(finalizer);
        }
    }
}

/* ===================== In-progress cleanup ===================== */

/// Cleanup work that must run at most once
///
/// Whoever runs [`effect`](Self::effect) first performs the work; later
/// callers wait for its outcome. Once started the work is detached from the
/// caller and always completes.
#[derive(Clone)]
pub(crate) struct InProgressFinalizer {
    pending: Arc<Mutex<Option<Effect>>>,
    outcome: Deferred,
}

impl InProgressFinalizer {
    pub(crate) fn new(work: Effect) -> Self {
        Self {
            pending: Arc::new(Mutex::new(Some(work))),
            outcome: Deferred::new(),
        }
    }

    pub(crate) fn effect(&self) -> Effect {
        let this = self.clone();
        Effect::from_fn(move |ctx| async move {
            let work = this.pending.lock().take();
            match work {
                Some(work) => {
                    let outcome = this.outcome.clone();
                    Effect::from_fn(move |ctx| async move {
                        let exit = work.run(ctx).await;
                        outcome.complete(exit.clone());
                        exit
                    })
                    .uninterruptible()
                    .run(ctx)
                    .await
                }
                None => this.outcome.wait().await,
            }
        })
    }

    pub(crate) fn is_same(&self, other: &InProgressFinalizer) -> bool {
        self.outcome.ptr_eq(&other.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Channel;
    use crate::effect::{Cause, Context};
    use crate::types::Val;

    fn k() -> ContinuationK {
        ContinuationK {
            on_success: Arc::new(|value: Val| Channel::succeed_now(value)),
            on_halt: Arc::new(|cause: Cause| Channel::fail_cause(cause)),
        }
    }

    fn recording(log: &Arc<Mutex<Vec<i64>>>, n: i64) -> Finalizer {
        let log = log.clone();
        Finalizer::new(move |_| {
            Effect::sync(move || {
                log.lock().push(n);
                Val::Unit
            })
        })
    }

    #[test]
    fn test_pop_next_finalizers_stops_at_continuation() {
        // [K, F1, F2] pops F2 then F1 and leaves K
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ContinuationStack::default();
        stack.push_k(k());
        stack.push_finalizer(recording(&log, 1));
        stack.push_finalizer(recording(&log, 2));

        let finalizers = stack.pop_next_finalizers();
        assert_eq!(finalizers.len(), 2);
        assert_eq!(stack.top(), Some(Top::K));
        assert!(stack.pop_k().is_some());
        assert!(stack.is_empty());
    }

    #[test]
    fn test_pop_k_leaves_finalizer_in_place() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ContinuationStack::default();
        stack.push_finalizer(recording(&log, 1));

        assert!(stack.pop_k().is_none());
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn test_restore_keeps_original_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ContinuationStack::default();
        stack.push_finalizer(recording(&log, 1));
        stack.push_finalizer(recording(&log, 2));

        let popped = stack.pop_next_finalizers();
        stack.restore_finalizers(popped);
        let again = stack.pop_all_finalizers();
        assert_eq!(again.len(), 2);
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn test_pop_all_runs_most_recent_first() {
        // [F1, K, F2, K, F3] runs F3, F2, F1 and drops the continuations
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = ContinuationStack::default();
        stack.push_finalizer(recording(&log, 1));
        stack.push_k(k());
        stack.push_finalizer(recording(&log, 2));
        stack.push_k(k());
        stack.push_finalizer(recording(&log, 3));

        let finalizers = stack.pop_all_finalizers();
        assert!(stack.is_empty());
        let exit = run_finalizers(finalizers, Exit::unit())
            .run(Context::empty())
            .await;

        assert_eq!(exit, Exit::unit());
        assert_eq!(*log.lock(), vec![3, 2, 1]);
    }

    #[tokio::test]
    async fn test_failing_finalizer_does_not_skip_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let finalizers = vec![
            Finalizer::new(|_| Effect::fail("first")),
            Finalizer::new(|_| panic!("second")),
            recording(&log, 3),
        ];

        let exit = run_finalizers(finalizers, Exit::unit())
            .run(Context::empty())
            .await;

        let Exit::Failure(cause) = exit else {
            unreachable!("Expected failure, got {:?}", exit);
        };
        assert_eq!(cause.failures(), vec![Val::from("first")]);
        assert_eq!(cause.defects().len(), 1);
        assert_eq!(*log.lock(), vec![3]);
    }

    #[tokio::test]
    async fn test_in_progress_runs_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let work = run_finalizers(vec![recording(&log, 1)], Exit::unit());
        let in_progress = InProgressFinalizer::new(work);

        let first = in_progress.effect().run(Context::empty()).await;
        let second = in_progress.effect().run(Context::empty()).await;

        assert_eq!(first, Exit::unit());
        assert_eq!(second, Exit::unit());
        assert_eq!(*log.lock(), vec![1]);
    }
}
