//! Stepping pure channels and the basic combinators

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::helpers::*;
use crate::channel::{Channel, ChannelState};
use crate::effect::{Cause, Context, Effect, Exit};
use crate::errors;
use crate::types::Val;

#[test]
fn test_emit_then_succeed_steps_without_effects() {
    // emit 1, emit 2, finish with "done": three steps, no effect requested
    let executor = executor(
        Channel::emit(1)
            .then(Channel::emit(2))
            .then(Channel::succeed_now("done")),
    );

    let ChannelState::Emit = executor.run() else {
        unreachable!("Expected the first element");
    };
    assert_eq!(executor.emitted(), Some(Val::Int(1)));

    let ChannelState::Emit = executor.run() else {
        unreachable!("Expected the second element");
    };
    assert_eq!(executor.emitted(), Some(Val::Int(2)));

    let state = executor.run();
    let ChannelState::Done(exit) = state else {
        unreachable!("Expected Done, got {:?}", state);
    };
    assert_eq!(exit, Exit::succeed("done"));
    assert_eq!(executor.done(), Some(Exit::succeed("done")));
}

#[test]
fn test_pure_channel_finishes_in_one_run() {
    let executor = executor(Channel::succeed_now(5).map(|v| Val::Int(v.as_int().unwrap_or(0) * 2)));

    let state = executor.run();

    let ChannelState::Done(exit) = state else {
        unreachable!("Expected Done, got {:?}", state);
    };
    assert_eq!(exit, Exit::succeed(10));
}

#[test]
fn test_running_after_done_repeats_the_exit() {
    let executor = executor(Channel::succeed_now("once"));

    executor.run();
    let state = executor.run();

    let ChannelState::Done(exit) = state else {
        unreachable!("Expected Done, got {:?}", state);
    };
    assert_eq!(exit, Exit::succeed("once"));
}

#[tokio::test]
async fn test_write_all_emits_in_order() {
    let executor = executor(Channel::write_all(vec![3, 1, 2]));

    let (elements, exit) = drive(&executor, &Context::empty()).await;

    assert_eq!(elements, ints(&[3, 1, 2]));
    assert_eq!(exit, Exit::unit());
}

#[test]
fn test_fail_finishes_with_failure() {
    let executor = executor(Channel::emit(1).then(Channel::fail("bad")));

    executor.run();
    let state = executor.run();

    let ChannelState::Done(Exit::Failure(cause)) = state else {
        unreachable!("Expected a failure, got {:?}", state);
    };
    assert_eq!(cause, Cause::fail("bad"));
}

#[test]
fn test_catch_all_cause_recovers() {
    let channel = Channel::fail("bad").catch_all_cause(|cause: Cause| {
        let first = cause.failures().into_iter().next().unwrap_or_default();
        Channel::succeed_now(Val::List(vec![Val::from("recovered"), first]))
    });

    let state = executor(channel).run();

    let ChannelState::Done(exit) = state else {
        unreachable!("Expected Done, got {:?}", state);
    };
    assert_eq!(exit, Exit::succeed(Val::List(vec![Val::from("recovered"), Val::from("bad")])));
}

#[test]
fn test_fold_cause_picks_the_matching_branch() {
    let on_success = Channel::succeed_now(1)
        .fold_cause(|_| Channel::succeed_now("halt"), |_| Channel::succeed_now("success"));
    let on_halt = Channel::fail("x")
        .fold_cause(|_| Channel::succeed_now("halt"), |_| Channel::succeed_now("success"));

    let ChannelState::Done(first) = executor(on_success).run() else {
        unreachable!("Expected Done");
    };
    let ChannelState::Done(second) = executor(on_halt).run() else {
        unreachable!("Expected Done");
    };
    assert_eq!(first, Exit::succeed("success"));
    assert_eq!(second, Exit::succeed("halt"));
}

#[tokio::test]
async fn test_from_effect_resumes_with_the_effect_value() {
    let executor = executor(
        Channel::from_effect(|| Effect::succeed(7)).map(|v| Val::Int(v.as_int().unwrap_or(0) + 1)),
    );

    let state = executor.run();
    let ChannelState::FromEffect(effect) = state else {
        unreachable!("Expected an effect request, got {:?}", state);
    };
    effect.run(Context::empty()).await;

    let state = executor.run();
    let ChannelState::Done(exit) = state else {
        unreachable!("Expected Done, got {:?}", state);
    };
    assert_eq!(exit, Exit::succeed(8));
}

#[tokio::test]
async fn test_failing_effect_fails_the_channel() {
    let executor = executor(Channel::from_effect(|| Effect::fail("io")));

    let (_, exit) = drive(&executor, &Context::empty()).await;

    assert_eq!(exit, Exit::fail("io"));
}

#[test]
fn test_panicking_callback_becomes_defect() {
    let executor = executor(Channel::succeed_now(1).flat_map(|_| -> Channel { panic!("kaboom") }));

    let state = executor.run();

    let ChannelState::Done(Exit::Failure(cause)) = state else {
        unreachable!("Expected a defect, got {:?}", state);
    };
    let defects = cause.defects();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].code, errors::DEFECT);
    assert!(defects[0].message.contains("kaboom"));
}

#[test]
fn test_defect_can_be_caught_by_enclosing_handler() {
    let channel = Channel::succeed(|| -> Val { panic!("thunk") })
        .catch_all_cause(|cause: Cause| Channel::succeed_now(cause.is_die()));

    let ChannelState::Done(exit) = executor(channel).run() else {
        unreachable!("Expected Done");
    };
    assert_eq!(exit, Exit::succeed(true));
}

#[test]
fn test_one_tree_runs_on_many_executors() {
    // Suspend rebuilds its body each run; the tree itself is never consumed
    let built = Arc::new(AtomicUsize::new(0));
    let counter = built.clone();
    let channel = Channel::suspend(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) as i64;
        Channel::succeed_now(n)
    });

    let ChannelState::Done(first) = executor(channel.clone()).run() else {
        unreachable!("Expected Done");
    };
    let ChannelState::Done(second) = executor(channel).run() else {
        unreachable!("Expected Done");
    };

    assert_eq!(first, Exit::succeed(0));
    assert_eq!(second, Exit::succeed(1));
    assert_eq!(built.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_read_without_upstream_dies() {
    let executor = executor(Channel::identity());

    let (_, exit) = drive(&executor, &Context::empty()).await;

    let Exit::Failure(cause) = exit else {
        unreachable!("Expected a failure, got {:?}", exit);
    };
    assert_eq!(cause.defects()[0].code, errors::UNEXPECTED_END_OF_INPUT);
}
