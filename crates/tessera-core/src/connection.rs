// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Connection (paginated list) state and its reducer.
//!
//! [`ConnectionResolver`] is a pure reducer over [`ConnectionState`]: it never
//! touches a record source. The `connection` handler in
//! [`crate::handlers`] reads client connection records into this shape,
//! reduces the incoming page, and writes the result back.
use rustc_hash::FxHashSet;

use crate::ident::DataId;

/// Field holding a connection's edges.
pub const EDGES: &str = "edges";
/// Field holding a connection's page info.
pub const PAGE_INFO: &str = "pageInfo";
/// Type name of client page info records.
pub const PAGE_INFO_TYPE: &str = "PageInfo";
/// Field holding an edge's node.
pub const NODE: &str = "node";
/// Field holding an edge's cursor.
pub const CURSOR: &str = "cursor";
/// Page info: cursor of the last edge.
pub const END_CURSOR: &str = "endCursor";
/// Page info: cursor of the first edge.
pub const START_CURSOR: &str = "startCursor";
/// Page info: more edges exist after the end cursor.
pub const HAS_NEXT_PAGE: &str = "hasNextPage";
/// Page info: more edges exist before the start cursor.
pub const HAS_PREVIOUS_PAGE: &str = "hasPreviousPage";

/// One edge of a connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionEdge {
    /// Record holding the edge, when the edge is backed by one.
    pub record: Option<DataId>,
    /// Edge cursor.
    pub cursor: Option<String>,
    /// Node the edge points at; edges are deduplicated by node.
    pub node: Option<DataId>,
}

impl ConnectionEdge {
    /// Edge pointing at `node` with `cursor`.
    pub fn new(node: impl Into<DataId>, cursor: impl Into<String>) -> Self {
        Self {
            record: None,
            cursor: Some(cursor.into()),
            node: Some(node.into()),
        }
    }
}

/// Pagination bookkeeping, copied verbatim from server pages.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageInfo {
    /// Cursor of the first loaded edge.
    pub start_cursor: Option<String>,
    /// Cursor of the last loaded edge.
    pub end_cursor: Option<String>,
    /// More edges exist after the end cursor.
    pub has_next_page: bool,
    /// More edges exist before the start cursor.
    pub has_previous_page: bool,
}

/// Pagination arguments a page was fetched with.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionArgs {
    /// Forward pagination cursor.
    pub after: Option<String>,
    /// Backward pagination cursor.
    pub before: Option<String>,
    /// Forward page size.
    pub first: Option<u64>,
    /// Backward page size.
    pub last: Option<u64>,
}

/// Where an inserted edge goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InsertPosition {
    /// After the last edge.
    Append,
    /// Before the first edge.
    Prepend,
}

/// Input to [`ConnectionResolver::reduce`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A server page arrived.
    Fetch {
        /// Arguments the page was requested with.
        args: ConnectionArgs,
        /// Edges of the page.
        edges: Vec<ConnectionEdge>,
        /// Page info of the page.
        page_info: PageInfo,
    },
    /// A locally inserted edge.
    Insert {
        /// The edge.
        edge: ConnectionEdge,
        /// Where to put it.
        position: InsertPosition,
    },
    /// Removal of every edge pointing at `node`.
    Delete {
        /// Node to remove.
        node: DataId,
    },
}

/// Accumulated connection contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// Loaded edges in display order.
    pub edges: Vec<ConnectionEdge>,
    /// Current page info.
    pub page_info: PageInfo,
}

/// Reducer folding [`ConnectionEvent`]s into [`ConnectionState`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ConnectionResolver;

impl ConnectionResolver {
    /// Empty connection.
    #[must_use]
    pub fn initialize(&self) -> ConnectionState {
        ConnectionState::default()
    }

    /// Folds `event` into `state`.
    ///
    /// A fetch without cursors replaces the edges and page info verbatim. A
    /// fetch `after` the current end cursor appends (dropping edges whose node
    /// is already present) and advances the end of the page info; a fetch
    /// `before` the current start cursor prepends symmetrically. A fetch whose
    /// cursor does not match the current page boundary is stale and leaves
    /// the state unchanged.
    #[must_use]
    pub fn reduce(&self, state: &ConnectionState, event: &ConnectionEvent) -> ConnectionState {
        match event {
            ConnectionEvent::Fetch {
                args,
                edges,
                page_info,
            } => match (&args.after, &args.before) {
                (None, None) => ConnectionState {
                    edges: edges.clone(),
                    page_info: page_info.clone(),
                },
                (Some(after), _) => {
                    if state.page_info.end_cursor.as_ref() != Some(after) {
                        tracing::debug!(%after, "ignoring connection page with stale `after` cursor");
                        return state.clone();
                    }
                    let mut next = state.clone();
                    next.edges = merge_edges(&state.edges, edges);
                    next.page_info.end_cursor.clone_from(&page_info.end_cursor);
                    next.page_info.has_next_page = page_info.has_next_page;
                    next
                }
                (None, Some(before)) => {
                    if state.page_info.start_cursor.as_ref() != Some(before) {
                        tracing::debug!(%before, "ignoring connection page with stale `before` cursor");
                        return state.clone();
                    }
                    let mut next = state.clone();
                    next.edges = merge_edges(edges, &state.edges);
                    next.page_info
                        .start_cursor
                        .clone_from(&page_info.start_cursor);
                    next.page_info.has_previous_page = page_info.has_previous_page;
                    next
                }
            },
            ConnectionEvent::Insert { edge, position } => {
                let mut next = state.clone();
                let single = std::slice::from_ref(edge);
                next.edges = match position {
                    InsertPosition::Append => merge_edges(&state.edges, single),
                    InsertPosition::Prepend => merge_edges(single, &state.edges),
                };
                next
            }
            ConnectionEvent::Delete { node } => {
                let mut next = state.clone();
                next.edges.retain(|e| e.node.as_ref() != Some(node));
                next
            }
        }
    }
}

/// Concatenates `first` and `second`, dropping edges whose node already
/// appeared earlier. Edges without a node are always kept.
fn merge_edges(first: &[ConnectionEdge], second: &[ConnectionEdge]) -> Vec<ConnectionEdge> {
    let mut seen: FxHashSet<&DataId> = FxHashSet::default();
    let mut merged = Vec::with_capacity(first.len() + second.len());
    for edge in first.iter().chain(second) {
        if let Some(node) = &edge.node {
            if !seen.insert(node) {
                continue;
            }
        }
        merged.push(edge.clone());
    }
    merged
}
