// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tessera_core::resolver::Resolver;
use tessera_core::{
    DataId, Environment, Field, Fragment, OptimisticUpdate, RecordSource, ResolverError,
    ResolverRegistry, Selection, Selector, Store, StoreError,
};
use tessera_dry_tests::{fragment_selector, CallCounter};

/// Registry with a `greeting` resolver over the owner's `name`, counting
/// every invocation.
pub fn greeting_registry(calls: &CallCounter) -> ResolverRegistry {
    let calls = calls.clone();
    ResolverRegistry::new()
        .with(
            "greeting",
            Resolver::plain(move |data, _, _| {
                calls.tick();
                let name = data["name"]
                    .as_str()
                    .ok_or_else(|| ResolverError::failed("name missing"))?;
                Ok(json!(format!("Hello, {name}!")))
            }),
        )
        .expect("greeting registers once")
}

/// `greeting` resolver field selection backed by a `name` fragment.
pub fn greeting_selection() -> Selection {
    Selection::resolver(
        Field::new("greeting"),
        Some(Arc::new(Fragment::new(
            "GreetingResolver",
            vec![Selection::scalar("name")],
        ))),
        "greeting",
    )
}

/// Selector reading `greeting` on user `id`.
pub fn greeting_selector(id: &str) -> Selector {
    fragment_selector(id, "UserGreeting", vec![greeting_selection()])
}

/// Selector reading `name` on user `id`.
pub fn name_selector(id: &str) -> Selector {
    fragment_selector(id, "UserName", vec![Selection::scalar("name")])
}

/// Environment over `source` with the given resolvers.
pub fn environment(source: RecordSource, resolvers: ResolverRegistry) -> Environment {
    Environment::new(Store::builder().source(source).resolvers(resolvers).build())
}

/// Sets `name` on user `id`, failing when the user is unknown.
pub fn set_name(
    proxy: &mut tessera_core::RecordSourceProxy<'_>,
    id: &str,
    name: &str,
) -> Result<(), StoreError> {
    let id = DataId::new(id);
    let mut record = proxy
        .get(&id)
        .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
    record.set_value("name", json!(name))?;
    Ok(())
}

/// Optimistic update renaming user `id`.
pub fn rename(id: &str, name: &str) -> OptimisticUpdate {
    let id = id.to_owned();
    let name = name.to_owned();
    OptimisticUpdate::updater(move |proxy| set_name(proxy, &id, &name))
}

/// Optimistic update appending `tag` to user `id`'s `tags` list.
pub fn append_tag(id: &str, tag: &str) -> OptimisticUpdate {
    let id = DataId::new(id);
    let tag = tag.to_owned();
    OptimisticUpdate::updater(move |proxy| {
        let mut record = proxy
            .get(&id)
            .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
        let mut tags = record
            .get_value("tags")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        tags.push(json!(tag));
        record.set_value("tags", Value::Array(tags))?;
        Ok(())
    })
}
