// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{environment, greeting_registry, greeting_selector, set_name};
use serde_json::json;
use tessera_core::resolver::Resolver;
use tessera_core::{Environment, Field, ResolverRegistry, Selection, Selector, Store, StoreError};
use tessera_dry_tests::{
    fragment_selector, user, CallCounter, PollingLiveSource, RecordingSubscriber, SourceBuilder,
};

fn two_users() -> tessera_core::RecordSource {
    SourceBuilder::new()
        .with(user("1", "Alice"))
        .with(user("2", "Bea"))
        .build()
}

fn live_env(source: &PollingLiveSource) -> Environment {
    let state = source.clone();
    let registry = ResolverRegistry::new()
        .with("counter", Resolver::live(move |_, _, _| Ok(state.state())))
        .unwrap();
    environment(two_users(), registry)
}

fn counter_selector() -> Selector {
    fragment_selector(
        "1",
        "UserCounter",
        vec![Selection::resolver(Field::new("counter"), None, "counter")],
    )
}

#[test]
fn repeated_reads_evaluate_once() {
    let calls = CallCounter::new();
    let mut env = environment(two_users(), greeting_registry(&calls));
    let first = env.lookup(&greeting_selector("1"));
    let second = env.lookup(&greeting_selector("1"));
    assert_eq!(first.data, second.data);
    assert_eq!(calls.count(), 1);
    assert_eq!(env.store().resolver_cache().evaluations(), 1);
}

#[test]
fn only_writes_to_inputs_invalidate_a_memo() {
    let calls = CallCounter::new();
    let mut env = environment(two_users(), greeting_registry(&calls));
    env.lookup(&greeting_selector("1"));

    env.commit_update(|proxy| set_name(proxy, "2", "Beatrice")).unwrap();
    assert_eq!(
        env.lookup(&greeting_selector("1")).data,
        json!({ "greeting": "Hello, Alice!" })
    );
    assert_eq!(calls.count(), 1);

    env.commit_update(|proxy| set_name(proxy, "1", "Ada")).unwrap();
    assert_eq!(
        env.lookup(&greeting_selector("1")).data,
        json!({ "greeting": "Hello, Ada!" })
    );
    env.lookup(&greeting_selector("1"));
    assert_eq!(calls.count(), 2);
}

#[test]
fn resolver_error_surfaces_as_a_field_error() {
    let calls = CallCounter::new();
    let mut env = environment(
        SourceBuilder::new()
            .with(tessera_dry_tests::RecordBuilder::new("1", "User").scalar("name", json!(7)))
            .build(),
        greeting_registry(&calls),
    );
    let snapshot = env.lookup(&greeting_selector("1"));
    assert_eq!(snapshot.data, json!({ "greeting": null }));
    assert_eq!(snapshot.field_errors.len(), 1);
    assert_eq!(calls.count(), 1);
}

#[test]
fn live_changes_reach_subscribers_when_raised() {
    let source = PollingLiveSource::new(json!(1));
    let mut env = live_env(&source);
    let snapshot = env.lookup(&counter_selector());
    assert_eq!(snapshot.data, json!({ "counter": 1 }));
    assert_eq!(source.subscriber_count(), 1);

    let subscriber = RecordingSubscriber::new();
    let _subscription = env.subscribe(snapshot, subscriber.callback());
    let epoch = env.store().current_write_epoch();
    source.set(json!(2));
    assert_eq!(subscriber.data(), vec![json!({ "counter": 2 })]);
    assert!(!env.store().live_queue().has_pending());
    assert_eq!(env.store().current_write_epoch(), epoch + 1);

    source.set(json!(3));
    assert_eq!(
        subscriber.data(),
        vec![json!({ "counter": 2 }), json!({ "counter": 3 })]
    );
    assert!(env.process_live_updates().is_empty());
}

#[test]
fn live_changes_without_an_environment_wait_for_processing() {
    let source = PollingLiveSource::new(json!(1));
    let state = source.clone();
    let registry = ResolverRegistry::new()
        .with("counter", Resolver::live(move |_, _, _| Ok(state.state())))
        .unwrap();
    let mut store = Store::builder()
        .source(two_users())
        .resolvers(registry)
        .build();
    let snapshot = store.lookup(&counter_selector());
    let subscriber = RecordingSubscriber::new();
    let _subscription = store.subscribe(snapshot, subscriber.callback());

    source.set(json!(2));
    assert_eq!(subscriber.calls(), 0);
    assert!(store.live_queue().has_pending());

    store.process_live_updates();
    assert_eq!(subscriber.data(), vec![json!({ "counter": 2 })]);
}

#[test]
fn batched_live_changes_notify_once() {
    let source = PollingLiveSource::new(json!(1));
    let mut env = live_env(&source);
    let snapshot = env.lookup(&counter_selector());
    let subscriber = RecordingSubscriber::new();
    let _subscription = env.subscribe(snapshot, subscriber.callback());

    let writer = source.clone();
    env.batch_live_state_updates(move || {
        writer.set(json!(3));
        writer.set(json!(4));
    })
    .unwrap();
    assert_eq!(subscriber.data(), vec![json!({ "counter": 4 })]);
}

#[test]
fn nested_batches_are_rejected() {
    let source = PollingLiveSource::new(json!(1));
    let mut env = live_env(&source);
    let queue = env.store().live_queue().clone();
    queue.begin_batch().unwrap();
    assert_eq!(
        env.batch_live_state_updates(|| {}).unwrap_err(),
        StoreError::NestedBatch
    );
    queue.end_batch();
    assert!(env.batch_live_state_updates(|| {}).is_ok());
}

#[test]
fn pending_live_value_reads_as_missing() {
    let source = PollingLiveSource::pending();
    let mut env = live_env(&source);
    let snapshot = env.lookup(&counter_selector());
    assert_eq!(snapshot.data, json!({ "counter": null }));
    assert_eq!(snapshot.missing_live_resolver_fields.len(), 1);

    let subscriber = RecordingSubscriber::new();
    let _subscription = env.subscribe(snapshot, subscriber.callback());
    source.set(json!(9));
    let last = subscriber.last().unwrap();
    assert_eq!(last.data, json!({ "counter": 9 }));
    assert!(last.missing_live_resolver_fields.is_empty());
}
