use maplit::hashmap;

use super::helpers::*;
use crate::channel::{run, Channel};
use crate::effect::{Context, Effect, Exit};
use crate::errors;
use crate::types::Val;

fn services(key: &str, value: &str) -> Context {
    Context::from_map(hashmap! { key.to_string() => Val::from(value) })
}

#[tokio::test]
async fn test_effects_see_the_provided_context() {
    let channel = Channel::from_effect(|| Effect::service("db")).provide_context(services("db", "primary"));

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::succeed("primary"));
}

#[tokio::test]
async fn test_context_is_restored_afterwards() {
    let channel = Channel::from_effect(|| Effect::service("db"))
        .provide_context(services("db", "provided"))
        .flat_map(|inner: Val| {
            Channel::from_effect(|| Effect::service("db"))
                .map(move |outer: Val| Val::List(vec![inner.clone(), outer]))
        });

    let exit = run(channel).run(services("db", "ambient")).await;

    assert_eq!(
        exit,
        Exit::succeed(Val::List(vec![Val::from("provided"), Val::from("ambient")]))
    );
}

#[tokio::test]
async fn test_provided_context_replaces_the_ambient_one() {
    let channel = Channel::from_effect(|| Effect::service("ambient")).provide_context(services("db", "x"));

    let exit = run(channel).run(services("ambient", "y")).await;

    let Exit::Failure(cause) = exit else {
        unreachable!("Expected a missing service, got {:?}", exit);
    };
    let defects = cause.defects();
    assert_eq!(defects.len(), 1);
    assert_eq!(defects[0].code, errors::MISSING_SERVICE);
}

#[tokio::test]
async fn test_release_runs_under_the_provided_context() {
    let events = log();
    let sink = events.clone();
    let channel = Channel::acquire_release_out(
        || Effect::service("pool"),
        move |_: Val, _: &Exit| {
            let sink = sink.clone();
            Effect::service("audit").flat_map(move |audit| record(&sink, audit))
        },
    )
    .provide_context(Context::from_map(hashmap! {
        "pool".to_string() => Val::from("conn"),
        "audit".to_string() => Val::from("audit log"),
    }));

    let exit = run(channel).run(Context::empty()).await;

    assert_eq!(exit, Exit::unit());
    assert_eq!(entries(&events), vec![Val::from("audit log")]);
}
