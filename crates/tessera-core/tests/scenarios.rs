// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{environment, greeting_registry, greeting_selector, name_selector, rename, set_name};
use serde_json::json;
use tessera_core::{ResolverRegistry, StoreError};
use tessera_dry_tests::{init_test_logging, user, CallCounter, RecordingSubscriber, SourceBuilder};

#[test]
fn computed_greeting_follows_its_input() {
    init_test_logging();
    let calls = CallCounter::new();
    let mut env = environment(SourceBuilder::new().build(), greeting_registry(&calls));
    env.commit_update(|proxy| {
        proxy.create("1".into(), "User")?.set_value("name", json!("Alice"))?;
        Ok(())
    })
    .unwrap();

    let snapshot = env.lookup(&greeting_selector("1"));
    assert_eq!(snapshot.data, json!({ "greeting": "Hello, Alice!" }));
    assert!(!snapshot.is_missing_data);

    let subscriber = RecordingSubscriber::new();
    let _subscription = env.subscribe(snapshot, subscriber.callback());
    env.commit_update(|proxy| set_name(proxy, "1", "Alicia")).unwrap();

    assert_eq!(subscriber.calls(), 1);
    assert_eq!(subscriber.data(), vec![json!({ "greeting": "Hello, Alicia!" })]);
    assert_eq!(calls.count(), 2);
}

#[test]
fn reverted_optimistic_rename_notifies_twice() {
    init_test_logging();
    let mut env = environment(
        SourceBuilder::new().with(user("1", "Alice")).build(),
        ResolverRegistry::new(),
    );
    let snapshot = env.lookup(&name_selector("1"));
    assert_eq!(snapshot.data, json!({ "name": "Alice" }));
    let subscriber = RecordingSubscriber::new();
    let _subscription = env.subscribe(snapshot, subscriber.callback());

    let handle = env.apply_update(rename("1", "Bob")).unwrap();
    assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "Bob" }));
    assert_eq!(subscriber.calls(), 1);

    handle.dispose();
    env.run().unwrap();
    assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "Alice" }));
    assert_eq!(
        subscriber.data(),
        vec![json!({ "name": "Bob" }), json!({ "name": "Alice" })]
    );
    assert!(!env.store().has_snapshot());
}

#[test]
fn unrelated_writes_do_not_notify() {
    let mut env = environment(
        SourceBuilder::new()
            .with(user("1", "Alice"))
            .with(user("2", "Bea"))
            .build(),
        ResolverRegistry::new(),
    );
    let subscriber = RecordingSubscriber::new();
    let snapshot = env.lookup(&name_selector("1"));
    let _subscription = env.subscribe(snapshot, subscriber.callback());

    env.commit_update(|proxy| set_name(proxy, "2", "Beatrice")).unwrap();
    assert_eq!(subscriber.calls(), 0);

    // Same value written again: the record is touched but the data is equal.
    env.commit_update(|proxy| set_name(proxy, "1", "Alice")).unwrap();
    assert_eq!(subscriber.calls(), 0);
}

#[test]
fn disposed_subscription_stops_receiving() {
    let mut env = environment(
        SourceBuilder::new().with(user("1", "Alice")).build(),
        ResolverRegistry::new(),
    );
    let subscriber = RecordingSubscriber::new();
    let snapshot = env.lookup(&name_selector("1"));
    let subscription = env.subscribe(snapshot, subscriber.callback());
    subscription.dispose();

    env.commit_update(|proxy| set_name(proxy, "1", "Alicia")).unwrap();
    assert_eq!(subscriber.calls(), 0);
}

#[test]
fn failing_commit_updater_leaves_the_store_untouched() {
    let mut env = environment(
        SourceBuilder::new().with(user("1", "Alice")).build(),
        ResolverRegistry::new(),
    );
    let before = env.store().canonical_source().clone();
    env.commit_update(|proxy| {
        set_name(proxy, "1", "Mallory")?;
        Err(StoreError::Updater("rejected".into()))
    })
    .unwrap();
    assert_eq!(env.store().canonical_source(), &before);
}
