//! Single-assignment outcome cell

use std::sync::Arc;
use tokio::sync::watch;

use super::{Effect, Exit};
use crate::errors;

/// Holds at most one [`Exit`], set once and readable by any number of waiters
#[derive(Clone)]
pub struct Deferred {
    cell: Arc<watch::Sender<Option<Exit>>>,
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl Deferred {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { cell: Arc::new(tx) }
    }

    /// Publish `exit`; returns false if a value was already published
    pub fn complete(&self, exit: Exit) -> bool {
        let mut exit = Some(exit);
        self.cell.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = exit.take();
            true
        })
    }

    pub fn succeed_unit(&self) -> bool {
        self.complete(Exit::unit())
    }

    pub fn is_done(&self) -> bool {
        self.cell.borrow().is_some()
    }

    pub fn poll(&self) -> Option<Exit> {
        self.cell.borrow().clone()
    }

    /// Wait until a value is published
    pub async fn wait(&self) -> Exit {
        let mut rx = self.cell.subscribe();
        let result = match rx.wait_for(Option::is_some).await {
            Ok(published) => published.clone(),
            Err(_) => None,
        };
        result.unwrap_or_else(|| Exit::die(errors::MISSING_DONE, "deferred dropped before completion"))
    }

    /// True when both handles refer to the same cell
    pub fn ptr_eq(&self, other: &Deferred) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    pub fn wait_effect(&self) -> Effect {
        let this = self.clone();
        Effect::from_future(async move { this.wait().await })
    }
}
