// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

mod common;

use common::{append_tag, environment, name_selector, rename, set_name};
use proptest::prelude::*;
use proptest::test_runner::{Config as PropConfig, RngAlgorithm, TestRng, TestRunner};
use serde_json::json;
use tessera_core::{
    DataId, Environment, HandleFieldPayload, OptimisticUpdate, RecordSourceView, RecordStatus,
    ResolverRegistry, Selection, Selector, StoreError, Variables,
};
use tessera_dry_tests::{
    fragment_selector, payload, query, user, RecordBuilder, RecordingSubscriber, SourceBuilder,
};

#[derive(Clone, Copy, Debug)]
enum Step {
    ApplyA,
    ApplyB,
    Commit,
}

const ORDERS: [[Step; 3]; 6] = [
    [Step::ApplyA, Step::ApplyB, Step::Commit],
    [Step::ApplyA, Step::Commit, Step::ApplyB],
    [Step::Commit, Step::ApplyA, Step::ApplyB],
    [Step::ApplyB, Step::ApplyA, Step::Commit],
    [Step::ApplyB, Step::Commit, Step::ApplyA],
    [Step::Commit, Step::ApplyB, Step::ApplyA],
];

fn tagged_env() -> Environment {
    environment(
        SourceBuilder::new()
            .with(user("1", "init").scalar("tags", json!([])))
            .build(),
        ResolverRegistry::new(),
    )
}

fn profile() -> Selector {
    fragment_selector(
        "1",
        "Profile",
        vec![Selection::scalar("name"), Selection::scalar("tags")],
    )
}

#[test]
fn applying_the_same_update_twice_is_rejected() {
    let mut env = tagged_env();
    let update = rename("1", "Bob");
    let _handle = env.apply_update(update.clone()).unwrap();
    let err = env.apply_update(update.clone()).unwrap_err();
    assert_eq!(err, StoreError::DuplicateOptimisticUpdate(update.id()));
    assert_eq!(env.queue().applied_update_count(), 1);
}

#[test]
fn reverting_the_only_update_restores_committed_state() {
    let mut env = tagged_env();
    let committed = env.store().canonical_source().clone();
    let before = env.lookup(&profile());

    let update = append_tag("1", "draft");
    let _handle = env.apply_update(update.clone()).unwrap();
    assert_eq!(
        env.lookup(&profile()).data,
        json!({ "name": "init", "tags": ["draft"] })
    );
    assert!(env.store().has_snapshot());

    env.revert_update(&update).unwrap();
    assert_eq!(env.store().canonical_source(), &committed);
    assert_eq!(env.lookup(&profile()).data, before.data);
    assert!(!env.store().has_snapshot());
    assert_eq!(env.queue().applied_update_count(), 0);
}

#[test]
fn replacing_an_update_swaps_it_in_one_run() {
    let mut env = tagged_env();
    let subscriber = RecordingSubscriber::new();
    let snapshot = env.lookup(&name_selector("1"));
    let _subscription = env.subscribe(snapshot, subscriber.callback());

    let bob = rename("1", "Bob");
    let _bob = env.apply_update(bob.clone()).unwrap();
    let _carol = env.replace_update(&bob, rename("1", "Carol")).unwrap();

    assert_eq!(
        subscriber.data(),
        vec![json!({ "name": "Bob" }), json!({ "name": "Carol" })]
    );
    assert_eq!(env.queue().applied_update_count(), 1);
}

#[test]
fn optimistic_payload_is_rolled_back_by_revert_all() {
    let mut env = tagged_env();
    let op = query("MeQuery", vec![Selection::linked(
        tessera_core::Field::new("me"),
        vec![Selection::scalar("name")],
    )]);
    let response = payload(
        SourceBuilder::new()
            .with(RecordBuilder::root().link("me", "1"))
            .with(user("1", "Optimistic"))
            .build(),
        Vec::new(),
    );
    let _handle = env
        .apply_update(OptimisticUpdate::payload(op.clone(), response))
        .unwrap();
    assert_eq!(env.lookup(&op.fragment).data, json!({ "me": { "name": "Optimistic" } }));

    env.revert_all().unwrap();
    let snapshot = env.lookup(&op.fragment);
    assert!(snapshot.is_missing_data);
    assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "init" }));
    assert!(env.store().canonical_source().get(&DataId::root()).is_none());
}

#[test]
fn failing_optimistic_update_is_discarded_without_touching_others() {
    let mut env = tagged_env();
    let _good = env.apply_update(append_tag("1", "ok")).unwrap();
    let _bad = env
        .apply_update(OptimisticUpdate::updater(|proxy| {
            set_name(proxy, "1", "half-written")?;
            Err(StoreError::Updater("boom".into()))
        }))
        .unwrap();
    assert_eq!(
        env.lookup(&profile()).data,
        json!({ "name": "init", "tags": ["ok"] })
    );
}

#[test]
fn disposing_a_rebased_update_delivers_committed_data() {
    for (committed_id, committed_name, expected) in
        [("2", "Beatrix", "Alice"), ("1", "Alicia", "Alicia")]
    {
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

        let handle = env.apply_update(rename("1", "Bob")).unwrap();
        env.commit_update(move |proxy| set_name(proxy, committed_id, committed_name))
            .unwrap();
        assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "Bob" }));

        handle.dispose();
        env.run().unwrap();
        assert_eq!(
            env.lookup(&name_selector("1")).data,
            json!({ "name": expected })
        );
        assert_eq!(
            subscriber.data(),
            vec![json!({ "name": "Bob" }), json!({ "name": expected })]
        );
    }
}

#[test]
fn optimistic_value_survives_a_commit_naming_an_unknown_handler() {
    let mut env = tagged_env();
    let _handle = env.apply_update(rename("1", "Bob")).unwrap();
    let broken = payload(
        SourceBuilder::new().with(user("1", "Mallory")).build(),
        vec![HandleFieldPayload {
            args: Variables::new(),
            data_id: DataId::new("1"),
            field_key: "name".into(),
            handle: "unknownHandle".into(),
            handle_key: "__name_unknownHandle".into(),
            handle_args: Variables::new(),
        }],
    );

    let err = env
        .commit_payload(&query("Broken", Vec::new()), broken)
        .unwrap_err();
    assert_eq!(err, StoreError::MissingHandler("unknownHandle".into()));
    assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "Bob" }));
    assert_eq!(env.queue().applied_update_count(), 1);
    assert!(env.store().has_snapshot());

    let update = rename("1", "Carol");
    let handle = env.apply_update(update.clone()).unwrap();
    handle.dispose();
    assert!(env.apply_update(update).is_ok());
    assert_eq!(env.lookup(&name_selector("1")).data, json!({ "name": "Carol" }));
}

#[test]
fn commits_rebase_under_applied_updates_in_any_order() {
    const SEED_BYTES: [u8; 32] = [
        0x7e, 0x55, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0,
    ];
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(
        PropConfig {
            cases: 64,
            ..PropConfig::default()
        },
        rng,
    );

    runner
        .run(&(0usize..ORDERS.len(), "[a-z]{1,8}"), |(order, server_name)| {
            let mut env = tagged_env();
            let mut handles = Vec::new();
            let mut expected_tags = vec![json!("server")];
            for step in ORDERS[order] {
                match step {
                    Step::ApplyA => {
                        handles.push(env.apply_update(append_tag("1", "a")).unwrap());
                        expected_tags.push(json!("a"));
                    }
                    Step::ApplyB => {
                        handles.push(env.apply_update(append_tag("1", "b")).unwrap());
                        expected_tags.push(json!("b"));
                    }
                    Step::Commit => {
                        let name = server_name.clone();
                        env.commit_update(move |proxy| {
                            let id = DataId::new("1");
                            let mut record = proxy
                                .get(&id)
                                .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
                            record
                                .set_value("name", json!(name))?
                                .set_value("tags", json!(["server"]))?;
                            Ok(())
                        })
                        .unwrap();
                    }
                }
            }

            prop_assert_eq!(
                env.lookup(&profile()).data,
                json!({ "name": server_name.clone(), "tags": expected_tags })
            );

            for handle in &handles {
                handle.dispose();
            }
            env.run().unwrap();
            prop_assert_eq!(
                env.lookup(&profile()).data,
                json!({ "name": server_name, "tags": ["server"] })
            );
            prop_assert!(!env.store().has_snapshot());
            Ok(())
        })
        .expect("rebased state matches applying updates over the committed data");
}

#[test]
fn reverting_any_single_update_restores_committed_data() {
    const SEED_BYTES: [u8; 32] = [
        0x2a, 0x17, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0,
    ];
    let rng = TestRng::from_seed(RngAlgorithm::ChaCha, &SEED_BYTES);
    let mut runner = TestRunner::new_with_rng(
        PropConfig {
            cases: 64,
            ..PropConfig::default()
        },
        rng,
    );
    let strategy = (
        prop::sample::select(vec!["1", "2", "3"]),
        "[a-z]{1,6}",
        any::<i64>(),
    );

    runner
        .run(&strategy, |(target, field, value)| {
            let mut env = environment(
                SourceBuilder::new()
                    .with(user("1", "Alice"))
                    .with(user("2", "Bea"))
                    .build(),
                ResolverRegistry::new(),
            );
            let selector = fragment_selector(
                target,
                "TargetFields",
                vec![Selection::scalar("name"), Selection::scalar(&field)],
            );
            let committed = env.store().canonical_source().clone();
            let before = env.lookup(&selector);

            let key = field.clone();
            let update = OptimisticUpdate::updater(move |proxy| {
                let id = DataId::new(target);
                if proxy.status(&id) != RecordStatus::Existent {
                    proxy.create(id.clone(), "User")?;
                }
                let mut record = proxy
                    .get(&id)
                    .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
                record.set_value(&key, json!(value))?;
                Ok(())
            });
            let _handle = env.apply_update(update.clone()).unwrap();
            env.revert_update(&update).unwrap();

            prop_assert_eq!(env.store().canonical_source().clone(), committed);
            let after = env.lookup(&selector);
            prop_assert_eq!(after.data, before.data);
            prop_assert_eq!(after.is_missing_data, before.is_missing_data);
            prop_assert!(!env.store().has_snapshot());
            Ok(())
        })
        .expect("revert restores the committed state");
}
