//! # Effect runtime boundary
//!
//! The channel engine never performs side effects itself. Whenever it needs
//! one (acquiring a resource, running a finalizer, waiting on a fiber) it hands
//! back an [`Effect`] for the driver to run.
//!
//! This module is deliberately small. It provides exactly what the engine
//! consumes:
//!
//! - [`Effect`]: a one-shot, lazily started async computation producing an [`Exit`]
//! - [`Exit`] / [`Cause`]: structured outcomes with sequential and parallel combination
//! - [`Context`]: the ambient service map effects run under
//! - [`Fiber`]: a forked tokio task that can be joined or interrupted
//! - [`Deferred`]: a single-assignment outcome cell
//! - [`Scope`]: a finalizer container with child scopes
//!
//! Interruption is cooperative: dropping the future returned by
//! [`Effect::run`] interrupts it at its next await point. Effects marked
//! [`uninterruptible`](Effect::uninterruptible) run on their own task and always
//! finish.

pub mod context;
pub mod deferred;
pub mod exit;
pub mod fiber;
pub mod scope;

pub use context::Context;
pub use deferred::Deferred;
pub use exit::{Cause, Exit, FiberId};
pub use fiber::Fiber;
pub use scope::{ExecutionStrategy, Scope};

use std::any::Any;
use std::fmt;
use std::future::{ready, Future};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;

use crate::errors;
use crate::types::Val;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/* ===================== Effect ===================== */

/// A description of async work that yields exactly one [`Exit`]
///
/// Nothing happens until [`run`](Effect::run) is called and the returned
/// future is polled.
pub struct Effect {
    run: Box<dyn FnOnce(Context) -> BoxFuture<Exit> + Send>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Effect(..)")
    }
}

impl Effect {
    /// Build an effect from an async function of the context
    pub fn from_fn<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'static,
        Fut: Future<Output = Exit> + Send + 'static,
    {
        Effect {
            run: Box::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    pub fn from_future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Exit> + Send + 'static,
    {
        Self::from_fn(move |_| future)
    }

    pub fn done(exit: Exit) -> Self {
        Self::from_fn(move |_| ready(exit))
    }

    pub fn succeed(value: impl Into<Val>) -> Self {
        Self::done(Exit::succeed(value))
    }

    pub fn unit() -> Self {
        Self::done(Exit::unit())
    }

    pub fn fail(error: impl Into<Val>) -> Self {
        Self::done(Exit::fail(error))
    }

    pub fn fail_cause(cause: Cause) -> Self {
        Self::done(Exit::Failure(cause))
    }

    pub fn die(code: &str, message: impl Into<String>) -> Self {
        Self::done(Exit::die(code, message))
    }

    /// Run a synchronous side effect; a panic becomes a defect
    pub fn sync<F>(f: F) -> Self
    where
        F: FnOnce() -> Val + Send + 'static,
    {
        Self::from_fn(move |_| ready(Exit::from(catch_defect(f))))
    }

    /// Build the effect lazily, at run time
    pub fn suspend<F>(f: F) -> Self
    where
        F: FnOnce() -> Effect + Send + 'static,
    {
        Self::from_fn(move |ctx| async move {
            match catch_defect(f) {
                Ok(effect) => effect.run(ctx).await,
                Err(cause) => Exit::Failure(cause),
            }
        })
    }

    /// Look up a service in the ambient context
    pub fn service(key: impl Into<String>) -> Self {
        let key = key.into();
        Self::from_fn(move |ctx| {
            ready(match ctx.get(&key) {
                Some(value) => Exit::Success(value.clone()),
                None => Exit::die(
                    errors::MISSING_SERVICE,
                    format!("Service '{}' not found in context", key),
                ),
            })
        })
    }

    /// Start the effect under `ctx`
    pub fn run(self, ctx: Context) -> BoxFuture<Exit> {
        (self.run)(ctx)
    }

    /* ===================== Combinators ===================== */

    pub fn map<F>(self, f: F) -> Self
    where
        F: FnOnce(Val) -> Val + Send + 'static,
    {
        Self::from_fn(move |ctx| async move {
            match self.run(ctx).await {
                Exit::Success(value) => Exit::from(catch_defect(move || f(value))),
                failure => failure,
            }
        })
    }

    pub fn as_unit(self) -> Self {
        self.map(|_| Val::Unit)
    }

    pub fn flat_map<F>(self, f: F) -> Self
    where
        F: FnOnce(Val) -> Effect + Send + 'static,
    {
        Self::from_fn(move |ctx| async move {
            match self.run(ctx.clone()).await {
                Exit::Success(value) => match catch_defect(move || f(value)) {
                    Ok(next) => next.run(ctx).await,
                    Err(cause) => Exit::Failure(cause),
                },
                failure => failure,
            }
        })
    }

    /// Continue with one of two effects depending on the outcome
    pub fn match_cause_effect<FF, FS>(self, on_failure: FF, on_success: FS) -> Self
    where
        FF: FnOnce(Cause) -> Effect + Send + 'static,
        FS: FnOnce(Val) -> Effect + Send + 'static,
    {
        Self::from_fn(move |ctx| async move {
            let next = match self.run(ctx.clone()).await {
                Exit::Success(value) => catch_defect(move || on_success(value)),
                Exit::Failure(cause) => catch_defect(move || on_failure(cause)),
            };
            match next {
                Ok(effect) => effect.run(ctx).await,
                Err(cause) => Exit::Failure(cause),
            }
        })
    }

    pub fn catch_all_cause<F>(self, f: F) -> Self
    where
        F: FnOnce(Cause) -> Effect + Send + 'static,
    {
        self.match_cause_effect(f, |value| Effect::done(Exit::Success(value)))
    }

    pub fn zip_right(self, that: Effect) -> Self {
        self.flat_map(move |_| that)
    }

    /// Run `finalizer` after `self` whatever the outcome
    ///
    /// A failing finalizer is appended to the primary failure, or replaces a
    /// success.
    pub fn ensuring(self, finalizer: Effect) -> Self {
        Self::from_fn(move |ctx| async move {
            let exit = self.run(ctx.clone()).await;
            match finalizer.run(ctx).await {
                Exit::Success(_) => exit,
                Exit::Failure(cause) => match exit {
                    Exit::Success(_) => Exit::Failure(cause),
                    Exit::Failure(primary) => Exit::Failure(primary.then(cause)),
                },
            }
        })
    }

    /// Run under `ctx` instead of the caller's context
    pub fn provide(self, ctx: Context) -> Self {
        Self::from_fn(move |_| self.run(ctx))
    }

    /// Run to completion even if the caller stops waiting
    ///
    /// The work moves to its own tokio task; dropping the outer future only
    /// detaches from it.
    pub fn uninterruptible(self) -> Self {
        Self::from_fn(move |ctx| async move {
            match tokio::spawn(self.run(ctx)).await {
                Ok(exit) => exit,
                Err(err) => Exit::Failure(fiber::join_error_cause(err)),
            }
        })
    }
}

/* ===================== Defect containment ===================== */

/// Call `f`, turning a panic into a [`Cause::Die`] with code `DEFECT`
pub(crate) fn catch_defect<T>(f: impl FnOnce() -> T) -> Result<T, Cause> {
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| Cause::defect(panic_message(&*payload)))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flat_map_threads_value() {
        let exit = Effect::succeed(20)
            .flat_map(|v| Effect::succeed(v.as_int().unwrap_or(0) + 1))
            .run(Context::empty())
            .await;
        assert_eq!(exit, Exit::succeed(21));
    }

    #[tokio::test]
    async fn test_sync_panic_becomes_defect() {
        let exit = Effect::sync(|| panic!("boom")).run(Context::empty()).await;
        let Exit::Failure(Cause::Die(info)) = exit else {
            unreachable!("Expected defect, got {:?}", exit);
        };
        assert_eq!(info.code, errors::DEFECT);
        assert!(info.message.contains("boom"));
    }

    #[tokio::test]
    async fn test_ensuring_appends_finalizer_failure() {
        let exit = Effect::fail("primary")
            .ensuring(Effect::fail("finalizer"))
            .run(Context::empty())
            .await;
        assert_eq!(
            exit.cause().map(Cause::failures),
            Some(vec![Val::from("primary"), Val::from("finalizer")])
        );
    }

    #[tokio::test]
    async fn test_service_reads_context() {
        let ctx = Context::empty().with("db", "postgres");
        assert_eq!(Effect::service("db").run(ctx).await, Exit::succeed("postgres"));

        let exit = Effect::service("db").run(Context::empty()).await;
        let Exit::Failure(Cause::Die(info)) = exit else {
            unreachable!("Expected defect, got {:?}", exit);
        };
        assert_eq!(info.code, errors::MISSING_SERVICE);
    }

    #[tokio::test]
    async fn test_provide_overrides_caller_context() {
        let exit = Effect::service("k")
            .provide(Context::empty().with("k", 1))
            .run(Context::empty().with("k", 2))
            .await;
        assert_eq!(exit, Exit::succeed(1));
    }

    #[tokio::test]
    async fn test_uninterruptible_survives_drop() {
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let effect = Effect::from_future(async move {
            let _ = started_tx.send(());
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let _ = done_tx.send(());
            Exit::unit()
        })
        .uninterruptible();

        let handle = tokio::spawn(effect.run(Context::empty()));
        started_rx.await.unwrap();
        handle.abort();

        assert!(done_rx.await.is_ok());
    }
}
