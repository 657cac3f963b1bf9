//! Structured outcomes
//!
//! - [`Exit`]: how a computation ended, a value or a [`Cause`]
//! - [`Cause`]: why it failed, as a tree of domain failures, defects and
//!   interruptions combined sequentially or in parallel
//! - [`FiberId`]: identity of the task that requested an interruption

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::errors;
use crate::types::{ErrorInfo, Val};

/* ===================== Fiber identity ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiberId(pub Uuid);

impl FiberId {
    pub fn new() -> Self {
        FiberId(Uuid::new_v4())
    }
}

impl Default for FiberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/* ===================== Cause ===================== */

/// Why a computation failed
///
/// `Empty` is the identity for both combinators, so folding a list of
/// outcomes never has to special-case the first one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[serde(tag = "t", content = "v")]
pub enum Cause {
    #[error("empty cause")]
    Empty,

    /// Expected, recoverable failure carrying a domain value
    #[error("failure: {0}")]
    Fail(Val),

    /// Unexpected failure; not meant to be recovered by domain handlers
    #[error("defect: {0}")]
    Die(ErrorInfo),

    #[error("interrupted by fiber {0}")]
    Interrupt(FiberId),

    #[error("{0}; then {1}")]
    Sequential(Box<Cause>, Box<Cause>),

    #[error("({0} | {1})")]
    Parallel(Box<Cause>, Box<Cause>),
}

impl Cause {
    pub fn fail(error: impl Into<Val>) -> Self {
        Cause::Fail(error.into())
    }

    pub fn die(code: &str, message: impl Into<String>) -> Self {
        Cause::Die(ErrorInfo::new(code, message))
    }

    /// Defect raised by a panicking user callback
    pub fn defect(message: impl Into<String>) -> Self {
        Cause::die(errors::DEFECT, message)
    }

    pub fn interrupt(fiber: FiberId) -> Self {
        Cause::Interrupt(fiber)
    }

    /// `self` happened, then `that` happened
    pub fn then(self, that: Cause) -> Cause {
        match (self, that) {
            (Cause::Empty, right) => right,
            (left, Cause::Empty) => left,
            (left, right) => Cause::Sequential(Box::new(left), Box::new(right)),
        }
    }

    /// `self` and `that` happened independently
    pub fn both(self, that: Cause) -> Cause {
        match (self, that) {
            (Cause::Empty, right) => right,
            (left, Cause::Empty) => left,
            (left, right) => Cause::Parallel(Box::new(left), Box::new(right)),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Cause::Empty => true,
            Cause::Sequential(l, r) | Cause::Parallel(l, r) => l.is_empty() && r.is_empty(),
            _ => false,
        }
    }

    /// Domain failures in left-to-right order
    pub fn failures(&self) -> Vec<Val> {
        let mut out = Vec::new();
        self.walk(&mut |c| {
            if let Cause::Fail(v) = c {
                out.push(v.clone());
            }
        });
        out
    }

    pub fn defects(&self) -> Vec<ErrorInfo> {
        let mut out = Vec::new();
        self.walk(&mut |c| {
            if let Cause::Die(info) = c {
                out.push(info.clone());
            }
        });
        out
    }

    pub fn interruptors(&self) -> Vec<FiberId> {
        let mut out = Vec::new();
        self.walk(&mut |c| {
            if let Cause::Interrupt(id) = c {
                out.push(*id);
            }
        });
        out
    }

    pub fn is_interrupted(&self) -> bool {
        !self.interruptors().is_empty()
    }

    pub fn is_die(&self) -> bool {
        !self.defects().is_empty()
    }

    // Iterative so very long sequential chains do not grow the native stack.
    fn walk(&self, visit: &mut impl FnMut(&Cause)) {
        let mut stack = vec![self];
        while let Some(cause) = stack.pop() {
            match cause {
                Cause::Sequential(l, r) | Cause::Parallel(l, r) => {
                    stack.push(r);
                    stack.push(l);
                }
                leaf => visit(leaf),
            }
        }
    }
}

/* ===================== Exit ===================== */

/// Final outcome of a computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum Exit {
    Success(Val),
    Failure(Cause),
}

impl Exit {
    pub fn succeed(value: impl Into<Val>) -> Self {
        Exit::Success(value.into())
    }

    pub fn unit() -> Self {
        Exit::Success(Val::Unit)
    }

    pub fn fail(error: impl Into<Val>) -> Self {
        Exit::Failure(Cause::fail(error))
    }

    pub fn fail_cause(cause: Cause) -> Self {
        Exit::Failure(cause)
    }

    pub fn die(code: &str, message: impl Into<String>) -> Self {
        Exit::Failure(Cause::die(code, message))
    }

    pub fn interrupt(fiber: FiberId) -> Self {
        Exit::Failure(Cause::interrupt(fiber))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Exit::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        !self.is_success()
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Exit::Failure(cause) if cause.is_interrupted())
    }

    pub fn value(&self) -> Option<&Val> {
        match self {
            Exit::Success(v) => Some(v),
            Exit::Failure(_) => None,
        }
    }

    pub fn cause(&self) -> Option<&Cause> {
        match self {
            Exit::Success(_) => None,
            Exit::Failure(c) => Some(c),
        }
    }

    pub fn map(self, f: impl FnOnce(Val) -> Val) -> Exit {
        match self {
            Exit::Success(v) => Exit::Success(f(v)),
            failure => failure,
        }
    }

    /// Keeps the right value; failures on both sides combine sequentially
    pub fn zip_right(self, that: Exit) -> Exit {
        match (self, that) {
            (Exit::Success(_), right) => right,
            (Exit::Failure(l), Exit::Success(_)) => Exit::Failure(l),
            (Exit::Failure(l), Exit::Failure(r)) => Exit::Failure(l.then(r)),
        }
    }

    /// Keeps the right value; failures on both sides combine in parallel
    pub fn zip_par_right(self, that: Exit) -> Exit {
        match (self, that) {
            (Exit::Success(_), right) => right,
            (Exit::Failure(l), Exit::Success(_)) => Exit::Failure(l),
            (Exit::Failure(l), Exit::Failure(r)) => Exit::Failure(l.both(r)),
        }
    }

    /// Collapses a batch of outcomes: unit when every one succeeded, otherwise
    /// every failure in order
    pub fn all(exits: impl IntoIterator<Item = Exit>) -> Exit {
        let cause = exits
            .into_iter()
            .filter_map(|exit| match exit {
                Exit::Failure(c) => Some(c),
                Exit::Success(_) => None,
            })
            .fold(Cause::Empty, Cause::then);
        if cause.is_empty() {
            Exit::unit()
        } else {
            Exit::Failure(cause)
        }
    }

    pub fn into_result(self) -> Result<Val, Cause> {
        match self {
            Exit::Success(v) => Ok(v),
            Exit::Failure(c) => Err(c),
        }
    }
}

impl From<Result<Val, Cause>> for Exit {
    fn from(result: Result<Val, Cause>) -> Self {
        match result {
            Ok(v) => Exit::Success(v),
            Err(c) => Exit::Failure(c),
        }
    }
}
