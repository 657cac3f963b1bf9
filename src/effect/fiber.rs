//! Forked background tasks
//!
//! A [`Fiber`] is a tokio task paired with a [`CancellationToken`]. Interrupting
//! a fiber cancels the token and waits for the task to wind down, so callers
//! always observe the fiber's final [`Exit`].

use std::future::Future;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{panic_message, Cause, Context, Effect, Exit, FiberId};
use crate::errors;

pub struct Fiber {
    id: FiberId,
    handle: JoinHandle<Exit>,
    interrupt: CancellationToken,
}

impl Fiber {
    /// Spawn a task that receives its own id and interruption token
    ///
    /// The task decides which parts of its work observe the token; anything it
    /// does after the token fires still runs to completion.
    pub fn spawn<F, Fut>(f: F) -> Fiber
    where
        F: FnOnce(FiberId, CancellationToken) -> Fut,
        Fut: Future<Output = Exit> + Send + 'static,
    {
        let id = FiberId::new();
        let interrupt = CancellationToken::new();
        let handle = tokio::spawn(f(id, interrupt.clone()));
        Fiber {
            id,
            handle,
            interrupt,
        }
    }

    /// Run `effect` in the background; interruption drops it at its next await point
    pub fn fork_daemon(effect: Effect, ctx: Context) -> Fiber {
        Self::spawn(move |id, token| async move {
            tokio::select! {
                exit = effect.run(ctx) => exit,
                _ = token.cancelled() => Exit::interrupt(id),
            }
        })
    }

    pub fn id(&self) -> FiberId {
        self.id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Exit {
        match self.handle.await {
            Ok(exit) => exit,
            Err(err) => Exit::Failure(join_error_cause(err)),
        }
    }

    pub async fn interrupt(self) -> Exit {
        debug!(fiber = %self.id, "Interrupting fiber");
        self.interrupt.cancel();
        self.join().await
    }

    /// [`interrupt`](Fiber::interrupt) as an effect; succeeds with unit
    /// whatever the fiber's own outcome was
    pub fn interrupt_effect(self) -> Effect {
        Effect::from_future(async move {
            self.interrupt().await;
            Exit::unit()
        })
    }
}

pub(crate) fn join_error_cause(err: JoinError) -> Cause {
    if err.is_panic() {
        let payload = err.into_panic();
        Cause::die(errors::FIBER_PANIC, panic_message(&*payload))
    } else {
        Cause::die(errors::FIBER_PANIC, "task was cancelled by the runtime")
    }
}
