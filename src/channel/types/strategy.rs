//! Merge policies for `ConcatAll`

use serde::{Deserialize, Serialize};

use crate::types::Val;

/// Argument of a concat's `on_pull` policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum UpstreamPullRequest {
    /// The upstream just produced this element
    Pulled(Val),
    /// The upstream is finished; this many children are still queued
    NoUpstream(usize),
}

/// When a concat looks ahead to the next upstream element
///
/// The optional value is a separator emitted before the next child runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum UpstreamPullStrategy {
    /// Pull upstream again as soon as the next child finishes
    PullAfterNext(Option<Val>),
    /// Pull upstream again only after every queued child has had a turn
    PullAfterAllEnqueued(Option<Val>),
}

/// Verdict on one element emitted by a child
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v")]
pub enum ChildExecutorDecision {
    /// Keep draining this child
    Continue,
    /// Stop this child now, treating the value as its done value
    Close(Val),
    /// Put this child back in the queue and let the parent pick again
    Yield,
}
