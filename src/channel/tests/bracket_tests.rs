use super::helpers::*;
use crate::channel::{run, Channel};
use crate::effect::{Context, Effect, Exit};
use crate::types::Val;

/// Resource 42 whose release records `[resource, exit was a failure, exit was an interruption]`
fn resource_42(events: &Log) -> Channel {
    let sink = events.clone();
    Channel::acquire_release_out(
        || Effect::succeed(42),
        move |resource: Val, exit: &Exit| {
            record(
                &sink,
                Val::List(vec![
                    resource,
                    Val::Bool(exit.is_failure()),
                    Val::Bool(exit.is_interrupted()),
                ]),
            )
        },
    )
}

/// Read one element, then fail
fn take_one_then_fail() -> Channel {
    Channel::read_with(
        |_| Channel::fail("boom"),
        Channel::fail_cause,
        |done| Channel::succeed_now(done),
    )
}

fn release_entry(failed: bool, interrupted: bool) -> Val {
    Val::List(vec![Val::Int(42), Val::Bool(failed), Val::Bool(interrupted)])
}

#[tokio::test]
async fn test_release_sees_the_failure_of_the_reader() {
    // The reader takes 42 and fails with "boom": one release, with 42 and a
    // failed exit
    let events = log();
    let channel = resource_42(&events).pipe_to(take_one_then_fail());

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::fail("boom"));
    assert_eq!(entries(&events), vec![release_entry(true, false)]);
}

#[tokio::test]
async fn test_release_runs_when_bracket_completes() {
    // Sequenced after the bracket, the failure happens once the resource scope
    // has already ended
    let events = log();
    let channel = resource_42(&events).then(Channel::fail("boom"));

    let (elements, exit, closed) = drive_and_close(channel).await;

    assert_eq!(elements, ints(&[42]));
    assert_eq!(exit, Exit::fail("boom"));
    assert_eq!(closed, Exit::unit());
    assert_eq!(entries(&events), vec![release_entry(false, false)]);
}

#[tokio::test]
async fn test_failed_acquire_skips_release() {
    let events = log();
    let sink = events.clone();
    let channel = Channel::acquire_release_out(
        || Effect::fail("no resource"),
        move |resource: Val, _: &Exit| record(&sink, resource),
    );

    let (elements, exit, _) = drive_and_close(channel).await;

    assert!(elements.is_empty());
    assert_eq!(exit, Exit::fail("no resource"));
    assert!(entries(&events).is_empty());
}

#[tokio::test]
async fn test_release_runs_once_when_cancelled() {
    let events = log();
    let executor = executor(resource_42(&events).pipe_to(Channel::identity()));
    let ctx = Context::empty();

    assert_eq!(next_element(&executor, &ctx).await, Val::Int(42));
    let interrupted = Exit::interrupt(crate::effect::FiberId::new());
    executor.cancel_with(interrupted.clone());
    let (_, exit) = drive(&executor, &ctx).await;
    assert!(exit.is_interrupted());

    let Some(close) = executor.close(&exit) else {
        unreachable!("Expected a close effect");
    };
    close.run(ctx).await;
    assert!(executor.close(&exit).is_none());

    assert_eq!(entries(&events), vec![release_entry(true, true)]);
}

#[tokio::test]
async fn test_each_run_acquires_its_own_resource() {
    let events = log();
    let channel = resource_42(&events).pipe_to(Channel::identity()).drain();

    run(channel.clone()).run(Context::empty()).await;
    run(channel).run(Context::empty()).await;

    assert_eq!(entries(&events).len(), 2);
}

#[tokio::test]
async fn test_nested_pipes_release_the_innermost_resource() {
    let events = log();
    let channel = resource_42(&events)
        .pipe_to(Channel::identity())
        .pipe_to(Channel::identity());

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::unit());
    assert_eq!(entries(&events), vec![release_entry(false, false)]);
}

#[tokio::test]
async fn test_dropping_a_closed_executor_still_releases_upstream() {
    // Only the close effect keeps the executor alive while it runs
    let events = log();
    let channel = resource_42(&events)
        .pipe_to(Channel::identity())
        .pipe_to(Channel::identity())
        .pipe_to(Channel::identity());
    let ctx = Context::empty();
    let executor = executor(channel);
    let (elements, exit) = drive(&executor, &ctx).await;
    assert_eq!(elements, ints(&[42]));

    let Some(close) = executor.close(&exit) else {
        unreachable!("Expected a close effect");
    };
    drop(executor);

    assert_eq!(close.run(ctx).await, Exit::unit());
    assert_eq!(entries(&events), vec![release_entry(false, false)]);
}
