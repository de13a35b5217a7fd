// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retained roots, the release buffer and mark-and-sweep collection.
use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tracing::instrument;

use super::Store;
use crate::disposable::Disposable;
use crate::ident::{DataId, RequestIdentifier};
use crate::record::{FieldValue, Record};
use crate::selector::{OperationDescriptor, Selection, Variables};
use crate::source::RecordSourceView;

/// One retained (or recently released) operation.
pub(crate) struct RootEntry {
    pub(crate) operation: OperationDescriptor,
    pub(crate) ref_count: usize,
    pub(crate) handles: Vec<Disposable>,
    /// Write epoch of the last notify that carried this operation.
    pub(crate) epoch: Option<u64>,
    /// Clock reading of the last notify that carried this operation.
    pub(crate) fetch_time: Option<u64>,
}

/// Retained roots keyed by request identifier, plus the FIFO of released
/// roots that are still kept alive.
#[derive(Default)]
pub(crate) struct Roots {
    entries: FxHashMap<RequestIdentifier, RootEntry>,
    release_buffer: VecDeque<RequestIdentifier>,
}

impl Roots {
    pub(crate) fn get(&self, id: &RequestIdentifier) -> Option<&RootEntry> {
        self.entries.get(id)
    }

    /// Stamps the root of `operation` after a write that carried it.
    ///
    /// An operation that is not retained is tracked temporarily in the release
    /// buffer when there is room, so its data survives until the buffer
    /// cycles.
    pub(crate) fn stamp(
        &mut self,
        operation: &OperationDescriptor,
        epoch: u64,
        now: u64,
        buffer_size: usize,
    ) {
        let id = &operation.request.identifier;
        if let Some(entry) = self.entries.get_mut(id) {
            entry.epoch = Some(epoch);
            entry.fetch_time = Some(now);
        } else if buffer_size > 0 && self.release_buffer.len() < buffer_size {
            self.release_buffer.push_back(id.clone());
            self.entries.insert(
                id.clone(),
                RootEntry {
                    operation: operation.clone(),
                    ref_count: 0,
                    handles: Vec::new(),
                    epoch: Some(epoch),
                    fetch_time: Some(now),
                },
            );
        }
    }
}

impl Store {
    /// Keeps `operation`'s data alive until the returned handle is disposed
    /// (and the root then cycles out of the release buffer).
    pub fn retain(&mut self, operation: &OperationDescriptor) -> Disposable {
        let id = operation.request.identifier.clone();
        let entry = self.roots.entries.entry(id.clone()).or_insert_with(|| RootEntry {
            operation: operation.clone(),
            ref_count: 0,
            handles: Vec::new(),
            epoch: None,
            fetch_time: None,
        });
        if entry.ref_count == 0 {
            self.roots.release_buffer.retain(|queued| *queued != id);
        }
        entry.ref_count += 1;
        let handle = Disposable::new();
        entry.handles.push(handle.clone());
        handle
    }

    /// Number of roots currently tracked (retained or in the release buffer).
    #[must_use]
    pub fn root_count(&self) -> usize {
        self.roots.entries.len()
    }

    /// Whether `id` is tracked as a root.
    #[must_use]
    pub fn is_root(&self, id: &RequestIdentifier) -> bool {
        self.roots.entries.contains_key(id)
    }

    /// Released roots still kept alive, oldest first.
    pub fn release_buffer(&self) -> impl Iterator<Item = &RequestIdentifier> {
        self.roots.release_buffer.iter()
    }

    /// Defers garbage collection until the returned handle is disposed.
    pub fn hold_gc(&mut self) -> Disposable {
        let handle = Disposable::new();
        self.gc_holds.push(handle.clone());
        handle
    }

    /// Whether any GC hold is still active.
    pub fn is_gc_held(&mut self) -> bool {
        self.gc_holds.retain(|h| !h.is_disposed());
        !self.gc_holds.is_empty()
    }

    /// Requests a collection at the next opportunity.
    pub fn schedule_gc(&mut self) {
        self.gc_scheduled = true;
    }

    /// Whether a collection is waiting to run.
    #[must_use]
    pub fn is_gc_scheduled(&self) -> bool {
        self.gc_scheduled
    }

    /// Processes disposed retains, then collects unless collection is
    /// disabled, held, or blocked by an optimistic overlay (in which case it
    /// stays scheduled). Returns whether a sweep ran.
    #[instrument(level = "debug", skip_all)]
    pub fn gc(&mut self) -> bool {
        self.release_disposed_roots();
        if !self.config.gc_enabled {
            self.gc_scheduled = false;
            return false;
        }
        if self.is_gc_held() || self.overlay.is_some() {
            tracing::debug!("collection deferred");
            self.gc_scheduled = true;
            return false;
        }
        self.gc_scheduled = false;
        self.collect();
        true
    }

    /// Applies lazily disposed retain handles.
    pub(crate) fn release_disposed_roots(&mut self) {
        let mut released: Vec<RequestIdentifier> = Vec::new();
        for (id, entry) in &mut self.roots.entries {
            let before = entry.handles.len();
            entry.handles.retain(|h| !h.is_disposed());
            let disposed = before - entry.handles.len();
            if disposed > 0 {
                entry.ref_count = entry.ref_count.saturating_sub(disposed);
                if entry.ref_count == 0 {
                    released.push(id.clone());
                }
            }
        }
        released.sort();
        for id in released {
            self.release_root(id);
        }
    }

    fn release_root(&mut self, id: RequestIdentifier) {
        let expired = match (self.roots.get(&id), self.config.query_cache_expiration_ms) {
            (Some(entry), Some(ttl)) => entry
                .fetch_time
                .is_some_and(|fetched| fetched <= self.now().saturating_sub(ttl)),
            _ => false,
        };
        if expired {
            tracing::debug!(root = %id, "released root already expired");
            self.roots.entries.remove(&id);
            self.schedule_gc();
            return;
        }
        self.roots.release_buffer.push_back(id);
        while self.roots.release_buffer.len() > self.config.gc_release_buffer_size {
            if let Some(evicted) = self.roots.release_buffer.pop_front() {
                tracing::debug!(root = %evicted, "root evicted from release buffer");
                self.roots.entries.remove(&evicted);
                self.schedule_gc();
            }
        }
    }

    fn collect(&mut self) {
        let mut marked: FxHashSet<DataId> = FxHashSet::default();
        let mut roots: Vec<&RootEntry> = self.roots.entries.values().collect();
        roots.sort_by(|a, b| {
            a.operation
                .request
                .identifier
                .cmp(&b.operation.request.identifier)
        });
        for root in roots {
            let selector = &root.operation.root;
            mark(
                &self.base,
                &selector.data_id,
                &selector.node.selections,
                &selector.variables,
                &mut marked,
            );
        }
        let before = self.base.size();
        if marked.is_empty() {
            self.base.clear();
        } else {
            self.base.retain(|id| marked.contains(id));
        }
        let base = &self.base;
        self.resolver_cache.retain_backing(|owner| base.has(owner));
        tracing::debug!(
            collected = before - self.base.size(),
            remaining = self.base.size(),
            "garbage collected"
        );
    }
}

fn mark(
    source: &dyn RecordSourceView,
    id: &DataId,
    selections: &[Selection],
    variables: &Variables,
    marked: &mut FxHashSet<DataId>,
) {
    marked.insert(id.clone());
    let Some(record) = source.get(id).cloned() else {
        return;
    };
    for selection in selections {
        match selection {
            Selection::Scalar(_) => {}
            Selection::Linked(linked) => {
                let key = linked.field.storage_key(variables);
                mark_link(source, &record, &key, &linked.selections, variables, marked);
                for handle in &linked.handles {
                    let handle_key = handle.handle_key(&linked.field, variables);
                    mark_link(
                        source,
                        &record,
                        &handle_key,
                        &linked.selections,
                        variables,
                        marked,
                    );
                }
            }
            Selection::Resolver(resolver) => {
                if let Some(fragment) = resolver.fragment.as_ref() {
                    mark(source, id, &fragment.selections, variables, marked);
                }
            }
            Selection::InlineFragment {
                type_condition,
                selections,
            } => {
                if record.typename() == type_condition {
                    mark(source, id, selections, variables, marked);
                }
            }
            Selection::Condition {
                condition,
                passing_value,
                selections,
            } => {
                if variables.get(condition).and_then(Value::as_bool) == Some(*passing_value) {
                    mark(source, id, selections, variables, marked);
                }
            }
        }
    }
}

fn mark_link(
    source: &dyn RecordSourceView,
    record: &Record,
    key: &str,
    selections: &[Selection],
    variables: &Variables,
    marked: &mut FxHashSet<DataId>,
) {
    match record.get(key) {
        Some(FieldValue::Link(target)) => mark(source, target, selections, variables, marked),
        Some(FieldValue::Links(targets)) => {
            for target in targets.iter().flatten() {
                mark(source, target, selections, variables, marked);
            }
        }
        _ => {}
    }
}
