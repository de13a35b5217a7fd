// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Field handlers: client-side post-processing of handle fields.
//!
//! A payload may carry [`HandleFieldPayload`]s next to its records. After the
//! records are published into a transaction, each payload is dispatched to
//! the [`Handler`] registered under its `handle` name. Built-ins cover
//! connection pagination and the declarative mutation directives
//! (`deleteRecord`, `appendEdge`, `prependEdge`, `deleteEdge`).
use std::rc::Rc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{json, Value};

use crate::connection::{
    ConnectionArgs, ConnectionEdge, ConnectionEvent, ConnectionResolver, ConnectionState,
    InsertPosition, PageInfo, CURSOR, EDGES, END_CURSOR, HAS_NEXT_PAGE, HAS_PREVIOUS_PAGE, NODE,
    PAGE_INFO, PAGE_INFO_TYPE, START_CURSOR,
};
use crate::error::StoreError;
use crate::ident::{format_storage_key, generate_client_id, DataId};
use crate::mutator::RecordSourceMutator;
use crate::proxy::{RecordProxy, RecordSourceProxy};
use crate::selector::Variables;
use crate::source::RecordStatus;

/// Name of the connection handler.
pub const CONNECTION_HANDLE: &str = "connection";
/// Name of the record deletion handler.
pub const DELETE_RECORD_HANDLE: &str = "deleteRecord";
/// Name of the edge append handler.
pub const APPEND_EDGE_HANDLE: &str = "appendEdge";
/// Name of the edge prepend handler.
pub const PREPEND_EDGE_HANDLE: &str = "prependEdge";
/// Name of the edge deletion handler.
pub const DELETE_EDGE_HANDLE: &str = "deleteEdge";

/// Counter used to mint client edge ids on a connection record.
const NEXT_EDGE_INDEX: &str = "__connection_next_edge_index";
/// Handle argument listing target connection ids.
const CONNECTIONS_ARG: &str = "connections";

/// One handle field occurrence found while normalizing a payload.
#[derive(Clone, Debug, PartialEq)]
pub struct HandleFieldPayload {
    /// Resolved field arguments.
    pub args: Variables,
    /// Record holding the field.
    pub data_id: DataId,
    /// Storage key of the server value.
    pub field_key: String,
    /// Handler name.
    pub handle: String,
    /// Storage key the handler writes to.
    pub handle_key: String,
    /// Resolved handle arguments (e.g. `connections`).
    pub handle_args: Variables,
}

/// Client-side processing of one handle field.
pub trait Handler {
    /// Applies the handler inside the publishing transaction.
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), StoreError>;
}

/// Name → handler table consulted when publishing payloads.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: FxHashMap<String, Rc<dyn Handler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &names)
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        let mut handlers: FxHashMap<String, Rc<dyn Handler>> = FxHashMap::default();
        handlers.insert(CONNECTION_HANDLE.to_owned(), Rc::new(ConnectionHandler));
        handlers.insert(DELETE_RECORD_HANDLE.to_owned(), Rc::new(DeleteRecordHandler));
        handlers.insert(
            APPEND_EDGE_HANDLE.to_owned(),
            Rc::new(EdgeHandler(InsertPosition::Append)),
        );
        handlers.insert(
            PREPEND_EDGE_HANDLE.to_owned(),
            Rc::new(EdgeHandler(InsertPosition::Prepend)),
        );
        handlers.insert(DELETE_EDGE_HANDLE.to_owned(), Rc::new(DeleteEdgeHandler));
        Self { handlers }
    }
}

impl HandlerRegistry {
    /// Registry holding only the built-in handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no handlers at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Built-ins plus `custom`, rejecting any name registered twice.
    pub fn with_handlers(
        custom: impl IntoIterator<Item = (String, Rc<dyn Handler>)>,
    ) -> Result<Self, StoreError> {
        let mut registry = Self::new();
        for (name, handler) in custom {
            registry.register(name, handler)?;
        }
        Ok(registry)
    }

    /// Adds `handler` under `name`.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        handler: Rc<dyn Handler>,
    ) -> Result<(), StoreError> {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            return Err(StoreError::DuplicateRegistration(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Handler registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Rc<dyn Handler>> {
        self.handlers.get(name)
    }
}

/// Id of the client connection record a `connection` handle with `key`
/// writes under `record`, for the given filter arguments.
#[must_use]
pub fn get_connection_id(record: &DataId, key: &str, filters: &Variables) -> DataId {
    let handle_key = format_storage_key(&format!("__{key}_{CONNECTION_HANDLE}"), filters);
    generate_client_id(record, &handle_key, None)
}

/// Merges server pages into a client-side connection record.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionHandler;

impl Handler for ConnectionHandler {
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), StoreError> {
        let parent = &payload.data_id;
        if proxy.status(parent) != RecordStatus::Existent {
            return Ok(());
        }
        let server = match proxy.mutator().get_linked_record_id(parent, &payload.field_key) {
            Some(Some(id)) if proxy.status(&id) == RecordStatus::Existent => id,
            _ => {
                record(proxy, parent)?.set_null(&payload.handle_key)?;
                return Ok(());
            }
        };

        let client = generate_client_id(parent, &payload.handle_key, None);
        let page_info_id = generate_client_id(&client, PAGE_INFO, None);
        let existing = proxy.status(&client) == RecordStatus::Existent;
        let previous = if existing {
            read_state(proxy.mutator(), &client)
        } else {
            let typename = proxy
                .mutator()
                .get_type(&server)
                .unwrap_or("Connection")
                .to_owned();
            proxy.create(client.clone(), &typename)?;
            if proxy.status(&page_info_id) != RecordStatus::Existent {
                proxy.create(page_info_id.clone(), PAGE_INFO_TYPE)?;
            }
            ConnectionState::default()
        };

        let event = ConnectionEvent::Fetch {
            args: if existing {
                connection_args(&payload.args)
            } else {
                ConnectionArgs::default()
            },
            edges: read_edges(proxy.mutator(), &server),
            page_info: read_page_info(proxy.mutator(), &server),
        };
        let next = ConnectionResolver.reduce(&previous, &event);

        copy_connection_fields(proxy, &server, &client)?;
        if !existing || next != previous {
            write_edges(proxy, &client, &previous, &next)?;
            write_page_info(proxy, &page_info_id, &next.page_info)?;
            record(proxy, &client)?.set_linked_record(PAGE_INFO, &page_info_id)?;
        }
        record(proxy, parent)?.set_linked_record(&payload.handle_key, &client)?;
        Ok(())
    }
}

/// Deletes the record(s) whose id the field holds.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteRecordHandler;

impl Handler for DeleteRecordHandler {
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), StoreError> {
        let value = proxy
            .mutator()
            .get_value(&payload.data_id, &payload.field_key)
            .cloned();
        for id in ids_from_value(value.as_ref()) {
            proxy.delete(&id)?;
        }
        Ok(())
    }
}

/// Inserts the edge(s) the field links into every listed connection.
#[derive(Clone, Copy, Debug)]
pub struct EdgeHandler(pub InsertPosition);

impl Handler for EdgeHandler {
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), StoreError> {
        let mutator = proxy.mutator();
        let server_edges: Vec<DataId> =
            match mutator.get_linked_record_id(&payload.data_id, &payload.field_key) {
                Some(Some(edge)) => vec![edge],
                _ => mutator
                    .get_linked_record_ids(&payload.data_id, &payload.field_key)
                    .flatten()
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .collect(),
            };
        for connection in connection_ids(&payload.handle_args) {
            if proxy.status(&connection) != RecordStatus::Existent {
                tracing::warn!(%connection, handle = %payload.handle, "connection not found");
                continue;
            }
            let mut state = read_state(proxy.mutator(), &connection);
            let previous = state.clone();
            for edge in &server_edges {
                let edge = read_edge(proxy.mutator(), edge);
                state = ConnectionResolver.reduce(
                    &state,
                    &ConnectionEvent::Insert {
                        edge,
                        position: self.0,
                    },
                );
            }
            if state != previous {
                write_edges(proxy, &connection, &previous, &state)?;
            }
        }
        Ok(())
    }
}

/// Removes edges pointing at the id(s) the field holds from every listed
/// connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeleteEdgeHandler;

impl Handler for DeleteEdgeHandler {
    fn update(
        &self,
        proxy: &mut RecordSourceProxy<'_>,
        payload: &HandleFieldPayload,
    ) -> Result<(), StoreError> {
        let value = proxy
            .mutator()
            .get_value(&payload.data_id, &payload.field_key)
            .cloned();
        let nodes = ids_from_value(value.as_ref());
        for connection in connection_ids(&payload.handle_args) {
            if proxy.status(&connection) != RecordStatus::Existent {
                tracing::warn!(%connection, handle = %payload.handle, "connection not found");
                continue;
            }
            let previous = read_state(proxy.mutator(), &connection);
            let next = nodes.iter().fold(previous.clone(), |state, node| {
                ConnectionResolver.reduce(&state, &ConnectionEvent::Delete { node: node.clone() })
            });
            if next != previous {
                write_edges(proxy, &connection, &previous, &next)?;
            }
        }
        Ok(())
    }
}

fn record<'p, 'a>(
    proxy: &'p mut RecordSourceProxy<'a>,
    id: &DataId,
) -> Result<RecordProxy<'p, 'a>, StoreError> {
    proxy
        .get(id)
        .ok_or_else(|| StoreError::RecordNotFound(id.clone()))
}

fn ids_from_value(value: Option<&Value>) -> Vec<DataId> {
    match value {
        Some(Value::String(id)) => vec![DataId::new(id)],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(DataId::new)
            .collect(),
        _ => Vec::new(),
    }
}

fn connection_ids(handle_args: &Variables) -> Vec<DataId> {
    ids_from_value(handle_args.get(CONNECTIONS_ARG))
}

fn connection_args(args: &Variables) -> ConnectionArgs {
    let text = |name: &str| args.get(name).and_then(Value::as_str).map(str::to_owned);
    let count = |name: &str| args.get(name).and_then(Value::as_u64);
    ConnectionArgs {
        after: text("after"),
        before: text("before"),
        first: count("first"),
        last: count("last"),
    }
}

fn read_edge(mutator: &RecordSourceMutator<'_>, edge: &DataId) -> ConnectionEdge {
    ConnectionEdge {
        record: Some(edge.clone()),
        cursor: mutator
            .get_value(edge, CURSOR)
            .and_then(Value::as_str)
            .map(str::to_owned),
        node: mutator.get_linked_record_id(edge, NODE).flatten(),
    }
}

fn read_edges(mutator: &RecordSourceMutator<'_>, connection: &DataId) -> Vec<ConnectionEdge> {
    mutator
        .get_linked_record_ids(connection, EDGES)
        .flatten()
        .unwrap_or_default()
        .iter()
        .flatten()
        .filter(|edge| mutator.status(edge) == RecordStatus::Existent)
        .map(|edge| read_edge(mutator, edge))
        .collect()
}

fn read_page_info(mutator: &RecordSourceMutator<'_>, connection: &DataId) -> PageInfo {
    let Some(page_info) = mutator.get_linked_record_id(connection, PAGE_INFO).flatten() else {
        return PageInfo::default();
    };
    let text = |key: &str| {
        mutator
            .get_value(&page_info, key)
            .and_then(Value::as_str)
            .map(str::to_owned)
    };
    let flag = |key: &str| {
        mutator
            .get_value(&page_info, key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    };
    PageInfo {
        start_cursor: text(START_CURSOR),
        end_cursor: text(END_CURSOR),
        has_next_page: flag(HAS_NEXT_PAGE),
        has_previous_page: flag(HAS_PREVIOUS_PAGE),
    }
}

fn read_state(mutator: &RecordSourceMutator<'_>, connection: &DataId) -> ConnectionState {
    ConnectionState {
        edges: read_edges(mutator, connection),
        page_info: read_page_info(mutator, connection),
    }
}

/// Copies the server connection's own fields (e.g. `totalCount`) onto the
/// client record; edges and page info are maintained separately.
fn copy_connection_fields(
    proxy: &mut RecordSourceProxy<'_>,
    server: &DataId,
    client: &DataId,
) -> Result<(), StoreError> {
    let Some(source) = proxy.mutator().get(server).cloned() else {
        return Ok(());
    };
    let mut target = record(proxy, client)?;
    for (key, value) in source.fields() {
        if key != EDGES && key != PAGE_INFO {
            target.set_field(key, value.clone())?;
        }
    }
    Ok(())
}

/// Writes `next.edges` onto `connection`, copying every edge that was not
/// already one of the connection's own edges into a fresh client edge.
fn write_edges(
    proxy: &mut RecordSourceProxy<'_>,
    connection: &DataId,
    previous: &ConnectionState,
    next: &ConnectionState,
) -> Result<(), StoreError> {
    let owned: FxHashSet<&DataId> = previous
        .edges
        .iter()
        .filter_map(|e| e.record.as_ref())
        .collect();
    let mut ids = Vec::with_capacity(next.edges.len());
    for edge in &next.edges {
        let id = match &edge.record {
            Some(id) if owned.contains(id) => id.clone(),
            Some(server) => build_client_edge(proxy, connection, server)?,
            None => continue,
        };
        ids.push(Some(id));
    }
    record(proxy, connection)?.set_linked_records(EDGES, ids)?;
    Ok(())
}

fn build_client_edge(
    proxy: &mut RecordSourceProxy<'_>,
    connection: &DataId,
    server_edge: &DataId,
) -> Result<DataId, StoreError> {
    let index = proxy
        .mutator()
        .get_value(connection, NEXT_EDGE_INDEX)
        .and_then(Value::as_u64)
        .and_then(|i| usize::try_from(i).ok())
        .unwrap_or(0);
    let id = generate_client_id(connection, EDGES, Some(index));
    let typename = proxy
        .mutator()
        .get_type(server_edge)
        .unwrap_or("Edge")
        .to_owned();
    if proxy.status(&id) != RecordStatus::Existent {
        proxy.create(id.clone(), &typename)?;
    }
    record(proxy, &id)?.copy_fields_from(server_edge)?;
    record(proxy, connection)?.set_value(NEXT_EDGE_INDEX, json!(index + 1))?;
    Ok(id)
}

fn write_page_info(
    proxy: &mut RecordSourceProxy<'_>,
    page_info: &DataId,
    info: &PageInfo,
) -> Result<(), StoreError> {
    let cursor = |c: &Option<String>| c.as_ref().map_or(Value::Null, |c| json!(c));
    record(proxy, page_info)?
        .set_value(START_CURSOR, cursor(&info.start_cursor))?
        .set_value(END_CURSOR, cursor(&info.end_cursor))?
        .set_value(HAS_NEXT_PAGE, json!(info.has_next_page))?
        .set_value(HAS_PREVIOUS_PAGE, json!(info.has_previous_page))?;
    Ok(())
}
