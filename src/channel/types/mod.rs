pub mod instruction;
pub mod state;
pub mod strategy;

pub use instruction::{
    Channel, CombineFn, ConcatAll, ContinuationK, Instruction, OnEmitFn, OnPullFn, OnValue,
};
pub use state::{ChannelState, OnEffect, OnReadDone, OnReadEmit, ReadRequest};
pub use strategy::{ChildExecutorDecision, UpstreamPullRequest, UpstreamPullStrategy};
