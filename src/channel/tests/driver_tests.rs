use super::helpers::*;
use crate::channel::driver::{run_scoped_with, run_with};
use crate::channel::{run, run_collect, run_scoped, Channel};
use crate::effect::{Context, Effect, ExecutionStrategy, Exit, Scope};
use crate::types::Val;

#[tokio::test]
async fn test_run_returns_the_done_value() {
    // Elements reaching the top level are skipped
    let channel = Channel::emit(1).then(Channel::succeed_now("done"));

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::succeed("done"));
}

#[tokio::test]
async fn test_run_collect_gathers_elements() {
    let channel = Channel::emit(1)
        .then(Channel::emit(2))
        .then(Channel::succeed_now("done"));

    let (elements, done) = collected(run_collect(channel).run(Context::empty()).await);

    assert_eq!(elements, ints(&[1, 2]));
    assert_eq!(done, Val::from("done"));
}

#[tokio::test]
async fn test_run_releases_before_returning() {
    let events = log();
    let sink = events.clone();
    let channel = Channel::emit(1).ensuring(move || record(&sink, "released"));

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::unit());
    assert_eq!(entries(&events), vec![Val::from("released")]);
}

#[tokio::test]
async fn test_run_scoped_keeps_resources_until_the_scope_closes() {
    let events = log();
    let sink = events.clone();
    let resource = Channel::acquire_release_out(
        || Effect::succeed("conn"),
        move |resource: Val, _: &Exit| record(&sink, resource),
    );
    let reader = Channel::read_with(
        |_| Channel::succeed_now("value"),
        Channel::fail_cause,
        |_| Channel::succeed_now("empty"),
    );
    let scope = Scope::new();
    let ctx = Context::empty();

    let exit = run_scoped(resource.pipe_to(reader), &scope).run(ctx.clone()).await;
    assert_eq!(exit, Exit::succeed("value"));
    assert!(entries(&events).is_empty());

    assert_eq!(scope.close(&exit).run(ctx).await, Exit::unit());
    assert_eq!(entries(&events), vec![Val::from("conn")]);
}

#[tokio::test]
async fn test_release_failure_fails_the_run() {
    let channel = Channel::emit(1).ensuring(|| Effect::fail("cleanup"));

    let exit = run(channel).run(Context::empty()).await;

    let Exit::Failure(cause) = exit else {
        unreachable!("Expected the release failure, got {:?}", exit);
    };
    assert_eq!(cause.failures(), vec![Val::from("cleanup")]);
}

#[tokio::test]
async fn test_release_failure_follows_the_channel_failure() {
    let channel = Channel::emit(1)
        .then(Channel::fail("primary"))
        .ensuring(|| Effect::fail("cleanup"));

    let exit = run(channel).run(Context::empty()).await;

    let Exit::Failure(cause) = exit else {
        unreachable!("Expected a failure, got {:?}", exit);
    };
    assert_eq!(cause.failures(), vec![Val::from("primary"), Val::from("cleanup")]);
}

#[tokio::test]
async fn test_run_under_parallel_scope() {
    let events = log();
    let sink = events.clone();
    let channel = Channel::emit(1).ensuring(move || record(&sink, "released"));
    let scope = Scope::with_strategy(ExecutionStrategy::Parallel);
    let ctx = Context::empty();

    let exit = run_scoped_with(channel, &scope, ExecutionStrategy::Parallel)
        .run(ctx.clone())
        .await;
    scope.close(&exit).run(ctx).await;

    assert_eq!(exit, Exit::unit());
    assert_eq!(entries(&events), vec![Val::from("released")]);
}

#[tokio::test]
async fn test_release_failure_fails_a_parallel_run() {
    let channel = Channel::emit(1).ensuring(|| Effect::fail("cleanup"));

    let exit = run_with(channel, ExecutionStrategy::Parallel)
        .run(Context::empty())
        .await;

    let Exit::Failure(cause) = exit else {
        unreachable!("Expected the release failure, got {:?}", exit);
    };
    assert_eq!(cause.failures(), vec![Val::from("cleanup")]);
}

#[tokio::test]
async fn test_release_failure_is_reported_by_the_owning_scope() {
    let scope = Scope::with_strategy(ExecutionStrategy::Parallel);
    let ctx = Context::empty();
    let channel = Channel::emit(1)
        .then(Channel::succeed_now("value"))
        .ensuring(|| Effect::fail("cleanup"));

    let exit = run_scoped_with(channel, &scope, ExecutionStrategy::Parallel)
        .run(ctx.clone())
        .await;
    assert_eq!(exit, Exit::succeed("value"));

    let closed = scope.close(&exit).run(ctx).await;
    let Exit::Failure(cause) = closed else {
        unreachable!("Expected the scope to report the release failure, got {:?}", closed);
    };
    assert_eq!(cause.failures(), vec![Val::from("cleanup")]);
}
