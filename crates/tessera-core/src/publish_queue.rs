// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordering of committed and optimistic writes into the store.
//!
//! The queue collects three kinds of work between runs:
//! - commits (server payloads, raw sources, updater closures), which land in
//!   the canonical source;
//! - optimistic updates waiting to be applied;
//! - optimistic updates already applied, kept so they can be replayed.
//!
//! Invariants
//! - Within one [`PublishQueue::run`], commits are published before any
//!   optimistic update is (re)applied.
//! - A rebase restores the store and replays every applied update in
//!   application order over the latest committed state, so the visible state
//!   is always "committed data + applied updates, applied fresh".
//! - An update id is applied at most once.
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use serde_json::Value;
use tracing::instrument;

use crate::disposable::Disposable;
use crate::error::StoreError;
use crate::handlers::HandleFieldPayload;
use crate::ident::{DataId, RequestIdentifier, UpdateId};
use crate::mutator::RecordSourceMutator;
use crate::proxy::{RecordSourceProxy, RecordSourceSelectorProxy};
use crate::reader::read;
use crate::resolver::{LiveUpdateQueue, ResolverCache};
use crate::selector::OperationDescriptor;
use crate::source::{LayeredSource, RecordSource};
use crate::store::Store;

/// Store updater run against the whole store.
pub type StoreUpdater = dyn Fn(&mut RecordSourceProxy<'_>) -> Result<(), StoreError>;

/// Updater scoped to an operation, receiving the data read from its payload.
pub type SelectorStoreUpdater =
    dyn Fn(&mut RecordSourceSelectorProxy<'_, '_>, Option<&Value>) -> Result<(), StoreError>;

/// One-shot store updater used by commits.
pub type StoreUpdaterOnce = dyn FnOnce(&mut RecordSourceProxy<'_>) -> Result<(), StoreError>;

/// One-shot selector updater used by payload commits.
pub type SelectorStoreUpdaterOnce =
    dyn FnOnce(&mut RecordSourceSelectorProxy<'_, '_>, Option<&Value>) -> Result<(), StoreError>;

/// A normalized server response.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResponsePayload {
    /// Normalized records.
    pub source: RecordSource,
    /// Handle fields encountered while normalizing, in document order.
    pub field_payloads: Vec<HandleFieldPayload>,
}

impl ResponsePayload {
    /// Payload without handle fields.
    #[must_use]
    pub fn new(source: RecordSource) -> Self {
        Self {
            source,
            field_payloads: Vec::new(),
        }
    }

    /// Adds handle field payloads.
    #[must_use]
    pub fn with_field_payloads(mut self, field_payloads: Vec<HandleFieldPayload>) -> Self {
        self.field_payloads = field_payloads;
        self
    }
}

#[derive(Clone)]
enum UpdateKind {
    Updater(Rc<StoreUpdater>),
    Payload {
        operation: OperationDescriptor,
        payload: Rc<ResponsePayload>,
        updater: Option<Rc<SelectorStoreUpdater>>,
    },
}

/// An optimistic write that can be applied, reverted and replayed.
///
/// Clones share the [`UpdateId`]: the queue treats them as the same update.
#[derive(Clone)]
pub struct OptimisticUpdate {
    id: UpdateId,
    kind: UpdateKind,
}

impl fmt::Debug for OptimisticUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.kind {
            UpdateKind::Updater(_) => "updater",
            UpdateKind::Payload { .. } => "payload",
        };
        f.debug_struct("OptimisticUpdate")
            .field("id", &self.id)
            .field("kind", &kind)
            .finish()
    }
}

impl OptimisticUpdate {
    /// Update running `f` against the store.
    pub fn updater(
        f: impl Fn(&mut RecordSourceProxy<'_>) -> Result<(), StoreError> + 'static,
    ) -> Self {
        Self {
            id: UpdateId::next(),
            kind: UpdateKind::Updater(Rc::new(f)),
        }
    }

    /// Update publishing an optimistic response for `operation`.
    pub fn payload(operation: OperationDescriptor, payload: ResponsePayload) -> Self {
        Self {
            id: UpdateId::next(),
            kind: UpdateKind::Payload {
                operation,
                payload: Rc::new(payload),
                updater: None,
            },
        }
    }

    /// Optimistic response followed by a selector-scoped updater.
    pub fn payload_with_updater(
        operation: OperationDescriptor,
        payload: ResponsePayload,
        updater: impl Fn(&mut RecordSourceSelectorProxy<'_, '_>, Option<&Value>) -> Result<(), StoreError>
            + 'static,
    ) -> Self {
        Self {
            id: UpdateId::next(),
            kind: UpdateKind::Payload {
                operation,
                payload: Rc::new(payload),
                updater: Some(Rc::new(updater)),
            },
        }
    }

    /// Identity shared by all clones of this update.
    #[must_use]
    pub fn id(&self) -> UpdateId {
        self.id
    }
}

enum PendingCommit {
    Payload {
        operation: OperationDescriptor,
        payload: ResponsePayload,
        updater: Option<Box<SelectorStoreUpdaterOnce>>,
    },
    Source(RecordSource),
    Updater(Box<StoreUpdaterOnce>),
}

struct QueuedUpdate {
    update: OptimisticUpdate,
    handle: Disposable,
}

/// Serializes every write to a [`Store`].
#[derive(Default)]
pub struct PublishQueue {
    pending_commits: VecDeque<PendingCommit>,
    pending_updates: Vec<QueuedUpdate>,
    applied_updates: Vec<QueuedUpdate>,
    pending_backup_rebase: bool,
    gc_hold: Option<Disposable>,
}

impl fmt::Debug for PublishQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublishQueue")
            .field("pending_commits", &self.pending_commits.len())
            .field("pending_updates", &self.pending_updates.len())
            .field("applied_updates", &self.applied_updates.len())
            .field("pending_backup_rebase", &self.pending_backup_rebase)
            .finish_non_exhaustive()
    }
}

impl PublishQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an optimistic update for the next run.
    ///
    /// Disposing the returned handle reverts the update at the next run.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> Result<Disposable, StoreError> {
        self.revert_disposed();
        if self.contains(update.id) {
            return Err(StoreError::DuplicateOptimisticUpdate(update.id));
        }
        let handle = Disposable::new();
        self.pending_updates.push(QueuedUpdate {
            update,
            handle: handle.clone(),
        });
        Ok(handle)
    }

    /// Reverts `update`. Unknown updates are ignored.
    pub fn revert_update(&mut self, update: &OptimisticUpdate) {
        self.revert_id(update.id);
    }

    /// Reverts every pending and applied optimistic update.
    pub fn revert_all(&mut self) {
        self.pending_updates.clear();
        self.applied_updates.clear();
        self.pending_backup_rebase = true;
    }

    /// Reverts `old` and queues `new` in its place.
    pub fn replace_update(
        &mut self,
        old: &OptimisticUpdate,
        new: OptimisticUpdate,
    ) -> Result<Disposable, StoreError> {
        self.revert_update(old);
        self.apply_update(new)
    }

    /// Queues a server payload for `operation`, with an optional updater run
    /// after the payload's handle fields.
    pub fn commit_payload(
        &mut self,
        operation: OperationDescriptor,
        payload: ResponsePayload,
        updater: Option<Box<SelectorStoreUpdaterOnce>>,
    ) {
        self.pending_commits.push_back(PendingCommit::Payload {
            operation,
            payload,
            updater,
        });
        self.pending_backup_rebase = true;
    }

    /// Queues a store updater.
    pub fn commit_update(
        &mut self,
        updater: impl FnOnce(&mut RecordSourceProxy<'_>) -> Result<(), StoreError> + 'static,
    ) {
        self.pending_commits
            .push_back(PendingCommit::Updater(Box::new(updater)));
        self.pending_backup_rebase = true;
    }

    /// Queues a raw source to publish as-is.
    pub fn commit_source(&mut self, source: RecordSource) {
        self.pending_commits.push_back(PendingCommit::Source(source));
        self.pending_backup_rebase = true;
    }

    /// Optimistic updates waiting for the next run.
    #[must_use]
    pub fn pending_update_count(&self) -> usize {
        self.pending_updates.len()
    }

    /// Optimistic updates currently reflected in the store.
    #[must_use]
    pub fn applied_update_count(&self) -> usize {
        self.applied_updates.len()
    }

    /// Whether the next run restores and replays applied updates.
    #[must_use]
    pub fn is_rebase_pending(&self) -> bool {
        self.pending_backup_rebase
    }

    /// Publishes all queued work into `store` and notifies subscribers.
    ///
    /// Returns the owners of subscriptions whose snapshots changed. A commit
    /// naming an unregistered handler is discarded; the rest of the pass
    /// still completes and the first such error is returned at the end.
    #[instrument(
        level = "debug",
        skip_all,
        fields(
            commits = self.pending_commits.len(),
            pending = self.pending_updates.len(),
            applied = self.applied_updates.len()
        )
    )]
    pub fn run(
        &mut self,
        store: &mut Store,
        source_operation: Option<&OperationDescriptor>,
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.revert_disposed();

        let gc_release_due = self.gc_hold.is_some() && self.applied_updates.is_empty();
        if self.pending_commits.is_empty()
            && self.pending_updates.is_empty()
            && !self.pending_backup_rebase
            && !gc_release_due
        {
            tracing::warn!("publish queue run with nothing to publish");
            if store.config().instrumented {
                return Err(StoreError::NoOpRun);
            }
        }

        if self.pending_backup_rebase && store.has_snapshot() {
            tracing::debug!("restoring store before rebase");
            store.restore()?;
        }
        let (invalidated_store, commit_error) = self.commit_data(store);

        let rebase = self.pending_backup_rebase;
        if !self.pending_updates.is_empty() || (rebase && !self.applied_updates.is_empty()) {
            if !store.has_snapshot() {
                store.snapshot()?;
            }
            self.apply_optimistic(store, rebase);
        }
        self.pending_backup_rebase = false;

        if self.applied_updates.is_empty() {
            if let Some(hold) = self.gc_hold.take() {
                hold.dispose();
            }
        } else if self.gc_hold.is_none() {
            self.gc_hold = Some(store.hold_gc());
        }

        let stamped = source_operation.filter(|_| commit_error.is_none());
        let owners = store.notify(stamped, invalidated_store);
        match commit_error {
            Some(err) => Err(err),
            None => Ok(owners),
        }
    }

    fn contains(&self, id: UpdateId) -> bool {
        self.pending_updates
            .iter()
            .chain(&self.applied_updates)
            .any(|queued| queued.update.id == id)
    }

    fn revert_id(&mut self, id: UpdateId) {
        if let Some(index) = self.pending_updates.iter().position(|q| q.update.id == id) {
            self.pending_updates.remove(index);
        } else if let Some(index) = self.applied_updates.iter().position(|q| q.update.id == id) {
            self.applied_updates.remove(index);
            self.pending_backup_rebase = true;
        }
    }

    fn revert_disposed(&mut self) {
        let disposed: Vec<UpdateId> = self
            .pending_updates
            .iter()
            .chain(&self.applied_updates)
            .filter(|queued| queued.handle.is_disposed())
            .map(|queued| queued.update.id)
            .collect();
        for id in disposed {
            tracing::trace!(update = %id, "reverting disposed update");
            self.revert_id(id);
        }
    }

    /// Publishes every pending commit in order. Returns whether any of them
    /// invalidated the whole store, and the first missing-handler error.
    fn commit_data(&mut self, store: &mut Store) -> (bool, Option<StoreError>) {
        let mut invalidated_store = false;
        let mut missing_handler = None;
        while let Some(commit) = self.pending_commits.pop_front() {
            let mut sink = RecordSource::new();
            let outcome = match commit {
                PendingCommit::Source(source) => {
                    store.publish(&source, &FxHashSet::default());
                    continue;
                }
                PendingCommit::Payload {
                    operation,
                    payload,
                    updater,
                } => {
                    let scratch = scratch_cache(store);
                    let view = store.source();
                    let mut proxy = RecordSourceProxy::new(
                        RecordSourceMutator::new(&view, &mut sink),
                        Some(store.handlers()),
                    );
                    apply_payload(&mut proxy, &operation, &payload, scratch, updater)
                        .map(|()| take_invalidations(&mut proxy))
                }
                PendingCommit::Updater(updater) => {
                    let view = store.source();
                    let mut proxy = RecordSourceProxy::new(
                        RecordSourceMutator::new(&view, &mut sink),
                        Some(store.handlers()),
                    );
                    updater(&mut proxy).map(|()| take_invalidations(&mut proxy))
                }
            };
            match outcome {
                Ok((ids, store_flag)) => {
                    store.publish(&sink, &ids);
                    invalidated_store |= store_flag;
                }
                Err(err @ StoreError::MissingHandler(_)) => {
                    tracing::error!(%err, "commit names an unregistered handler, discarding its writes");
                    if missing_handler.is_none() {
                        missing_handler = Some(err);
                    }
                }
                Err(err) => tracing::warn!(%err, "commit failed, discarding its writes"),
            }
        }
        (invalidated_store, missing_handler)
    }

    /// Runs optimistic updates into one sink and publishes it into the
    /// overlay. With `rebase`, every applied update is replayed first.
    fn apply_optimistic(&mut self, store: &mut Store, rebase: bool) {
        let mut overlay = RecordSource::new();
        if rebase {
            tracing::debug!(replayed = self.applied_updates.len(), "rebasing optimistic updates");
            for queued in &self.applied_updates {
                run_optimistic(store, &mut overlay, &queued.update);
            }
        }
        for queued in std::mem::take(&mut self.pending_updates) {
            run_optimistic(store, &mut overlay, &queued.update);
            self.applied_updates.push(queued);
        }
        store.publish(&overlay, &FxHashSet::default());
    }
}

/// Runs one optimistic update over the store and the updates already
/// collected in `overlay`. A failing update leaves `overlay` untouched.
fn run_optimistic(store: &Store, overlay: &mut RecordSource, update: &OptimisticUpdate) {
    let mut sink = RecordSource::new();
    let result = {
        let view = store.source();
        let layered = LayeredSource::new(&view, Some(&*overlay));
        let mut proxy = RecordSourceProxy::new(
            RecordSourceMutator::new(&layered, &mut sink),
            Some(store.handlers()),
        );
        let result = match &update.kind {
            UpdateKind::Updater(f) => f(&mut proxy),
            UpdateKind::Payload {
                operation,
                payload,
                updater,
            } => {
                let updater = updater.clone();
                apply_payload(
                    &mut proxy,
                    operation,
                    payload,
                    scratch_cache(store),
                    updater.map(|f| -> Box<SelectorStoreUpdaterOnce> {
                        Box::new(move |p, data| f(p, data))
                    }),
                )
            }
        };
        if result.is_ok() && proxy.is_store_marked_for_invalidation() {
            tracing::debug!(update = %update.id, "store invalidation ignored for optimistic update");
        }
        result
    };
    match result {
        Ok(()) => {
            for (id, state) in sink {
                overlay.insert_entry(id, state);
            }
        }
        Err(err) => tracing::warn!(update = %update.id, %err, "optimistic update failed"),
    }
}

/// Publishes `payload` through `proxy`, then runs the selector updater with
/// the operation's data as read from the payload.
fn apply_payload(
    proxy: &mut RecordSourceProxy<'_>,
    operation: &OperationDescriptor,
    payload: &ResponsePayload,
    mut cache: ResolverCache,
    updater: Option<Box<SelectorStoreUpdaterOnce>>,
) -> Result<(), StoreError> {
    proxy.publish_source(&payload.source, &payload.field_payloads)?;
    if let Some(updater) = updater {
        let data = read(&payload.source, &mut cache, &operation.fragment).data;
        let data = (!data.is_null()).then_some(data);
        let mut selector_proxy = RecordSourceSelectorProxy::new(proxy, &operation.fragment);
        updater(&mut selector_proxy, data.as_ref())?;
    }
    Ok(())
}

/// Throwaway resolver cache for reading payload data.
fn scratch_cache(store: &Store) -> ResolverCache {
    let cache = store.resolver_cache();
    ResolverCache::new(
        cache.registry().clone(),
        cache.context().clone(),
        LiveUpdateQueue::new(),
    )
}

fn take_invalidations(proxy: &mut RecordSourceProxy<'_>) -> (FxHashSet<DataId>, bool) {
    (
        proxy.take_ids_marked_for_invalidation(),
        proxy.is_store_marked_for_invalidation(),
    )
}
