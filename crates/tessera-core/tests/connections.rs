// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use serde_json::{json, Value};
use tessera_core::connection::{
    ConnectionArgs, ConnectionEdge, ConnectionEvent, ConnectionResolver, InsertPosition, PageInfo,
};
use tessera_core::handlers::{
    get_connection_id, APPEND_EDGE_HANDLE, CONNECTION_HANDLE, DELETE_EDGE_HANDLE,
    DELETE_RECORD_HANDLE,
};
use tessera_core::{
    format_storage_key, DataId, Environment, Field, HandleFieldPayload, OperationDescriptor,
    RecordSource, RecordSourceView, RecordStatus, Selection, Store, Variables,
};
use tessera_dry_tests::{
    payload, query, query_with_variables, user, RecordBuilder, RecordingSubscriber, SourceBuilder,
};

const HANDLE_KEY: &str = "__friends_connection";

fn friends_query() -> OperationDescriptor {
    query(
        "FriendsQuery",
        vec![Selection::linked(
            Field::new("friends").with_storage_key(HANDLE_KEY),
            vec![
                Selection::plural(
                    Field::new("edges"),
                    vec![
                        Selection::scalar("cursor"),
                        Selection::linked(Field::new("node"), vec![Selection::scalar("name")]),
                    ],
                ),
                Selection::linked(
                    Field::new("pageInfo"),
                    vec![
                        Selection::scalar("endCursor"),
                        Selection::scalar("hasNextPage"),
                    ],
                ),
            ],
        )],
    )
}

fn args(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), v.clone()))
        .collect()
}

/// A server page of friends `ids` under `friends(<page_args>)` on the root.
fn page(tag: &str, page_args: &Variables, ids: &[&str], end: &str, has_next: bool) -> RecordSource {
    let field_key = format_storage_key("friends", page_args);
    let connection = format!("server:{tag}");
    let edge_ids: Vec<String> = ids.iter().map(|id| format!("{connection}:edge:{id}")).collect();
    let edge_refs: Vec<Option<&str>> = edge_ids.iter().map(|e| Some(e.as_str())).collect();
    let page_info = format!("{connection}:pageInfo");

    let mut source = SourceBuilder::new()
        .with(RecordBuilder::root().link(&field_key, &connection))
        .with(
            RecordBuilder::new(&connection, "FriendsConnection")
                .links("edges", &edge_refs)
                .link("pageInfo", &page_info)
                .scalar("totalCount", json!(4)),
        )
        .with(
            RecordBuilder::new(&page_info, "PageInfo")
                .scalar("endCursor", json!(end))
                .scalar("hasNextPage", json!(has_next)),
        );
    for (id, edge) in ids.iter().zip(&edge_ids) {
        source = source
            .with(
                RecordBuilder::new(edge, "FriendsEdge")
                    .scalar("cursor", json!(format!("c{id}")))
                    .link("node", id),
            )
            .with(user(id, &format!("friend {id}")));
    }
    source.build()
}

fn connection_payload(page_args: &Variables) -> HandleFieldPayload {
    HandleFieldPayload {
        args: page_args.clone(),
        data_id: DataId::root(),
        field_key: format_storage_key("friends", page_args),
        handle: CONNECTION_HANDLE.to_owned(),
        handle_key: HANDLE_KEY.to_owned(),
        handle_args: Variables::new(),
    }
}

fn mutation_payload(field_key: &str, handle: &str, handle_key: &str) -> HandleFieldPayload {
    let connection = get_connection_id(&DataId::root(), "friends", &Variables::new());
    HandleFieldPayload {
        args: Variables::new(),
        data_id: DataId::new("mutation"),
        field_key: field_key.to_owned(),
        handle: handle.to_owned(),
        handle_key: handle_key.to_owned(),
        handle_args: args(&[("connections", json!([connection.as_str()]))]),
    }
}

fn node_names(data: &Value) -> Vec<Value> {
    data["friends"]["edges"]
        .as_array()
        .map(|edges| edges.iter().map(|e| e["node"]["name"].clone()).collect())
        .unwrap_or_default()
}

fn loaded_env() -> (Environment, OperationDescriptor) {
    let mut env = Environment::new(Store::new(RecordSource::new()));
    let op = friends_query();
    let first = args(&[("first", json!(2))]);
    env.commit_payload(
        &op,
        payload(
            page("p1", &first, &["1", "2"], "c2", true),
            vec![connection_payload(&first)],
        ),
    )
    .unwrap();
    (env, op)
}

#[test]
fn first_page_populates_the_client_connection() {
    let (mut env, op) = loaded_env();
    let snapshot = env.lookup(&op.fragment);
    assert!(!snapshot.is_missing_data);
    assert_eq!(
        node_names(&snapshot.data),
        vec![json!("friend 1"), json!("friend 2")]
    );
    assert_eq!(
        snapshot.data["friends"]["pageInfo"],
        json!({ "endCursor": "c2", "hasNextPage": true })
    );

    let client = get_connection_id(&DataId::root(), "friends", &Variables::new());
    assert_eq!(client.as_str(), "client:root:__friends_connection");
    let record = env.store().source().get(&client).cloned().unwrap();
    assert_eq!(record.get_value("totalCount"), Some(&json!(4)));
}

#[test]
fn next_page_appends_and_advances_page_info() {
    let (mut env, op) = loaded_env();
    let subscriber = RecordingSubscriber::new();
    let snapshot = env.lookup(&op.fragment);
    let _subscription = env.subscribe(snapshot, subscriber.callback());

    let after = args(&[("after", json!("c2")), ("first", json!(2))]);
    let next = query_with_variables("FriendsPage", Vec::new(), after.clone());
    env.commit_payload(
        &next,
        payload(
            page("p2", &after, &["3", "4"], "c4", false),
            vec![connection_payload(&after)],
        ),
    )
    .unwrap();

    assert_eq!(subscriber.calls(), 1);
    let data = &subscriber.last().unwrap().data;
    assert_eq!(
        node_names(data),
        vec![
            json!("friend 1"),
            json!("friend 2"),
            json!("friend 3"),
            json!("friend 4")
        ]
    );
    assert_eq!(
        data["friends"]["pageInfo"],
        json!({ "endCursor": "c4", "hasNextPage": false })
    );
}

#[test]
fn page_with_a_stale_cursor_is_ignored() {
    let (mut env, op) = loaded_env();
    let before = env.lookup(&op.fragment).data;
    let stale = args(&[("after", json!("c9")), ("first", json!(2))]);
    let next = query_with_variables("FriendsPage", Vec::new(), stale.clone());
    env.commit_payload(
        &next,
        payload(
            page("p3", &stale, &["5"], "c5", false),
            vec![connection_payload(&stale)],
        ),
    )
    .unwrap();
    assert_eq!(env.lookup(&op.fragment).data, before);
}

#[test]
fn mutation_directives_edit_the_connection() {
    let (mut env, op) = loaded_env();
    let mutation = query("FriendMutation", Vec::new());

    let add = payload(
        SourceBuilder::new()
            .with(RecordBuilder::new("mutation", "MutationPayload").link("friendEdge", "edge:5"))
            .with(
                RecordBuilder::new("edge:5", "FriendsEdge")
                    .scalar("cursor", json!("c5"))
                    .link("node", "5"),
            )
            .with(user("5", "friend 5"))
            .build(),
        vec![mutation_payload(
            "friendEdge",
            APPEND_EDGE_HANDLE,
            "__friendEdge_appendEdge",
        )],
    );
    env.commit_payload(&mutation, add).unwrap();
    assert_eq!(
        node_names(&env.lookup(&op.fragment).data),
        vec![json!("friend 1"), json!("friend 2"), json!("friend 5")]
    );

    let remove = payload(
        SourceBuilder::new()
            .with(RecordBuilder::new("mutation", "MutationPayload").scalar("removedId", json!("1")))
            .build(),
        vec![mutation_payload(
            "removedId",
            DELETE_EDGE_HANDLE,
            "__removedId_deleteEdge",
        )],
    );
    env.commit_payload(&mutation, remove).unwrap();
    assert_eq!(
        node_names(&env.lookup(&op.fragment).data),
        vec![json!("friend 2"), json!("friend 5")]
    );

    let delete = payload(
        SourceBuilder::new()
            .with(RecordBuilder::new("mutation", "MutationPayload").scalar("deletedId", json!("5")))
            .build(),
        vec![mutation_payload(
            "deletedId",
            DELETE_RECORD_HANDLE,
            "__deletedId_deleteRecord",
        )],
    );
    env.commit_payload(&mutation, delete).unwrap();
    assert_eq!(
        env.store().source().status(&DataId::new("5")),
        RecordStatus::Nonexistent
    );
    assert_eq!(
        node_names(&env.lookup(&op.fragment).data),
        vec![json!("friend 2"), Value::Null]
    );
}

#[test]
fn reducer_folds_pages_inserts_and_deletes() {
    let resolver = ConnectionResolver;
    let first_page = ConnectionEvent::Fetch {
        args: ConnectionArgs {
            first: Some(2),
            ..ConnectionArgs::default()
        },
        edges: vec![ConnectionEdge::new("1", "c1"), ConnectionEdge::new("2", "c2")],
        page_info: PageInfo {
            end_cursor: Some("c2".into()),
            has_next_page: true,
            ..PageInfo::default()
        },
    };
    let state = resolver.reduce(&resolver.initialize(), &first_page);
    assert_eq!(state.edges.len(), 2);

    let second_page = ConnectionEvent::Fetch {
        args: ConnectionArgs {
            after: Some("c2".into()),
            first: Some(2),
            ..ConnectionArgs::default()
        },
        edges: vec![ConnectionEdge::new("2", "c2"), ConnectionEdge::new("3", "c3")],
        page_info: PageInfo {
            end_cursor: Some("c3".into()),
            has_next_page: false,
            ..PageInfo::default()
        },
    };
    let state = resolver.reduce(&state, &second_page);
    let nodes: Vec<&str> = state
        .edges
        .iter()
        .filter_map(|e| e.node.as_ref().map(DataId::as_str))
        .collect();
    assert_eq!(nodes, vec!["1", "2", "3"]);
    assert_eq!(state.page_info.end_cursor.as_deref(), Some("c3"));
    assert!(!state.page_info.has_next_page);

    let state = resolver.reduce(
        &state,
        &ConnectionEvent::Insert {
            edge: ConnectionEdge::new("0", "c0"),
            position: InsertPosition::Prepend,
        },
    );
    let state = resolver.reduce(
        &state,
        &ConnectionEvent::Delete {
            node: DataId::new("2"),
        },
    );
    let nodes: Vec<&str> = state
        .edges
        .iter()
        .filter_map(|e| e.node.as_ref().map(DataId::as_str))
        .collect();
    assert_eq!(nodes, vec!["0", "1", "3"]);
}
