//! Scoped finalizer containers
//!
//! A [`Scope`] collects finalizers and runs them once, when it is closed.
//! Child scopes created with [`Scope::fork`] are closed by their parent.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{catch_defect, fiber, Cause, Effect, Exit};

/// How a scope runs its finalizers on close
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One at a time, last added first
    #[default]
    Sequential,
    /// All at once
    Parallel,
}

type ScopeFinalizer = Box<dyn FnOnce(&Exit) -> Effect + Send>;

struct ScopeState {
    finalizers: Vec<ScopeFinalizer>,
    exit: Option<Exit>,
    strategy: ExecutionStrategy,
}

#[derive(Clone)]
pub struct Scope {
    state: Arc<Mutex<ScopeState>>,
    closing: CancellationToken,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Self::with_strategy(ExecutionStrategy::Sequential)
    }

    pub fn with_strategy(strategy: ExecutionStrategy) -> Self {
        Self::build(strategy, CancellationToken::new(), None)
    }

    fn build(strategy: ExecutionStrategy, closing: CancellationToken, exit: Option<Exit>) -> Self {
        Scope {
            state: Arc::new(Mutex::new(ScopeState {
                finalizers: Vec::new(),
                exit,
                strategy,
            })),
            closing,
        }
    }

    pub fn strategy(&self) -> ExecutionStrategy {
        self.state.lock().strategy
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().exit.is_some()
    }

    /// Token cancelled as soon as the scope starts closing
    pub fn closing(&self) -> CancellationToken {
        self.closing.clone()
    }

    /// Register `finalizer`
    ///
    /// On an open scope this returns a unit effect. On a closed scope the
    /// finalizer cannot be deferred any more, so the returned effect runs it
    /// right away with the scope's exit.
    #[must_use = "the returned effect runs the finalizer if the scope is already closed"]
    pub fn add_finalizer<F>(&self, finalizer: F) -> Effect
    where
        F: FnOnce(&Exit) -> Effect + Send + 'static,
    {
        let mut state = self.state.lock();
        match state.exit.clone() {
            Some(exit) => {
                drop(state);
                Effect::suspend(move || finalizer(&exit))
            }
            None => {
                state.finalizers.push(Box::new(finalizer));
                Effect::unit()
            }
        }
    }

    /// Create a child scope closed (with the same exit) when this one closes
    pub fn fork(&self, strategy: ExecutionStrategy) -> Scope {
        let mut state = self.state.lock();
        match state.exit.clone() {
            Some(exit) => {
                let closing = CancellationToken::new();
                closing.cancel();
                Scope::build(strategy, closing, Some(exit))
            }
            None => {
                let child = Scope::build(strategy, self.closing.child_token(), None);
                let handle = child.clone();
                state
                    .finalizers
                    .push(Box::new(move |exit: &Exit| handle.close(exit)));
                child
            }
        }
    }

    /// Close the scope, running every finalizer exactly once
    ///
    /// All finalizers run even if some fail; the failures are combined.
    /// Closing an already closed scope is a no-op.
    pub fn close(&self, exit: &Exit) -> Effect {
        let this = self.clone();
        let exit = exit.clone();
        Effect::from_fn(move |ctx| async move {
            let (finalizers, strategy) = {
                let mut state = this.state.lock();
                if state.exit.is_some() {
                    return Exit::unit();
                }
                state.exit = Some(exit.clone());
                (std::mem::take(&mut state.finalizers), state.strategy)
            };
            this.closing.cancel();
            debug!(count = finalizers.len(), ?strategy, "Closing scope");

            match strategy {
                ExecutionStrategy::Sequential => {
                    let mut cause = Cause::Empty;
                    for finalizer in finalizers.into_iter().rev() {
                        let outcome = match catch_defect(|| finalizer(&exit)) {
                            Ok(effect) => effect.run(ctx.clone()).await,
                            Err(defect) => Exit::Failure(defect),
                        };
                        if let Exit::Failure(c) = outcome {
                            cause = cause.then(c);
                        }
                    }
                    if cause.is_empty() {
                        Exit::unit()
                    } else {
                        Exit::Failure(cause)
                    }
                }
                ExecutionStrategy::Parallel => {
                    let mut tasks = JoinSet::new();
                    let mut cause = Cause::Empty;
                    for finalizer in finalizers {
                        match catch_defect(|| finalizer(&exit)) {
                            Ok(effect) => {
                                tasks.spawn(effect.run(ctx.clone()));
                            }
                            Err(defect) => cause = cause.both(defect),
                        }
                    }
                    while let Some(joined) = tasks.join_next().await {
                        let outcome = joined.unwrap_or_else(|err| Exit::Failure(fiber::join_error_cause(err)));
                        if let Exit::Failure(c) = outcome {
                            cause = cause.both(c);
                        }
                    }
                    if cause.is_empty() {
                        Exit::unit()
                    } else {
                        Exit::Failure(cause)
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::Context;
    use crate::types::Val;

    fn recorder() -> (Arc<Mutex<Vec<Val>>>, impl Fn(i64) -> Effect) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = log.clone();
        let record = move |n: i64| {
            let log = handle.clone();
            Effect::sync(move || {
                log.lock().push(Val::Int(n));
                Val::Unit
            })
        };
        (log, record)
    }

    #[tokio::test]
    async fn test_sequential_runs_last_added_first() {
        let scope = Scope::new();
        let (log, record) = recorder();
        for n in 1..=3 {
            let effect = record(n);
            let _ = scope.add_finalizer(move |_| effect);
        }

        let exit = scope.close(&Exit::unit()).run(Context::empty()).await;
        assert_eq!(exit, Exit::unit());
        assert_eq!(*log.lock(), vec![Val::Int(3), Val::Int(2), Val::Int(1)]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_other_finalizers() {
        let scope = Scope::with_strategy(ExecutionStrategy::Parallel);
        let (log, record) = recorder();
        let effect = record(1);
        let _ = scope.add_finalizer(move |_| effect);
        let _ = scope.add_finalizer(|_| Effect::fail("cleanup"));

        let exit = scope.close(&Exit::unit()).run(Context::empty()).await;
        assert_eq!(exit.cause().map(Cause::failures), Some(vec![Val::from("cleanup")]));
        assert_eq!(*log.lock(), vec![Val::Int(1)]);
    }

    #[tokio::test]
    async fn test_add_after_close_runs_immediately() {
        let scope = Scope::new();
        scope.close(&Exit::fail("done")).run(Context::empty()).await;

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        let effect = scope.add_finalizer(move |exit| {
            *slot.lock() = Some(exit.clone());
            Effect::unit()
        });
        effect.run(Context::empty()).await;

        assert_eq!(*seen.lock(), Some(Exit::fail("done")));
    }

    #[tokio::test]
    async fn test_child_closes_with_parent() {
        let parent = Scope::new();
        let child = parent.fork(ExecutionStrategy::Sequential);
        let closing = child.closing();
        let (log, record) = recorder();
        let effect = record(7);
        let _ = child.add_finalizer(move |_| effect);

        parent.close(&Exit::unit()).run(Context::empty()).await;
        assert!(child.is_closed());
        assert!(closing.is_cancelled());
        assert_eq!(*log.lock(), vec![Val::Int(7)]);
    }
}
