// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The normalized record store.
//!
//! The store owns the canonical [`RecordSource`], an optional optimistic
//! overlay, the resolver cache, subscriptions and retained roots. Writes
//! arrive through [`Store::publish`]; [`Store::notify`] then bumps the write
//! epoch, invalidates resolver memos and re-reads affected subscriptions.
//!
//! Invariants
//! - While an overlay exists every publish lands in the overlay; the base is
//!   untouched until [`Store::restore`] drops the overlay.
//! - Garbage collection never runs while an overlay exists or a GC hold is
//!   active; it is deferred until both are gone.
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashSet;
use serde_json::json;
use tracing::instrument;

use crate::config::StoreConfig;
use crate::disposable::Disposable;
use crate::error::StoreError;
use crate::handlers::HandlerRegistry;
use crate::ident::{DataId, RequestIdentifier};
use crate::reader::{read, Snapshot};
use crate::record::INVALIDATED_AT_KEY;
use crate::resolver::{LiveUpdateQueue, ResolverCache, ResolverContext, ResolverRegistry};
use crate::selector::{OperationDescriptor, Selector};
use crate::source::{LayeredSource, RecordSource, RecordSourceView, RecordState};

mod check;
mod gc;
mod subscriptions;

pub use check::{
    LinkedHandlerFn, MissingFieldHandler, OperationAvailability, PluralLinkedHandlerFn,
    ScalarHandlerFn,
};
pub use subscriptions::SubscriptionCallback;

use gc::Roots;
use subscriptions::Subscriptions;

/// Millisecond clock used for fetch times and query cache expiration.
pub type Clock = Box<dyn Fn() -> u64>;

fn system_clock() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
}

/// Builder for [`Store`].
///
/// Handler and resolver registries, the resolver context and the clock are
/// fixed at construction.
pub struct StoreBuilder {
    source: RecordSource,
    config: StoreConfig,
    handlers: HandlerRegistry,
    resolvers: ResolverRegistry,
    context: ResolverContext,
    clock: Clock,
}

impl std::fmt::Debug for StoreBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreBuilder")
            .field("records", &self.source.size())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        Self {
            source: RecordSource::new(),
            config: StoreConfig::default(),
            handlers: HandlerRegistry::new(),
            resolvers: ResolverRegistry::new(),
            context: ResolverContext::default(),
            clock: Box::new(system_clock),
        }
    }
}

impl StoreBuilder {
    /// Initial canonical records.
    pub fn source(mut self, source: RecordSource) -> Self {
        self.source = source;
        self
    }

    /// Store configuration.
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Handle field handlers.
    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Resolver implementations.
    pub fn resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Value injected into every resolver invocation.
    pub fn context(mut self, context: ResolverContext) -> Self {
        self.context = context;
        self
    }

    /// Clock used for fetch times, in milliseconds.
    pub fn clock(mut self, clock: impl Fn() -> u64 + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Builds the store.
    pub fn build(self) -> Store {
        let live_queue = LiveUpdateQueue::new();
        Store {
            base: self.source,
            overlay: None,
            resolver_cache: ResolverCache::new(self.resolvers, self.context, live_queue.clone()),
            live_queue,
            handlers: self.handlers,
            updated_record_ids: FxHashSet::default(),
            current_write_epoch: 0,
            global_invalidation_epoch: None,
            roots: Roots::default(),
            gc_holds: Vec::new(),
            gc_scheduled: false,
            subscriptions: Subscriptions::default(),
            clock: self.clock,
            config: self.config,
        }
    }
}

/// Normalized record store with optimistic overlay, subscriptions, retained
/// roots and garbage collection.
pub struct Store {
    base: RecordSource,
    overlay: Option<RecordSource>,
    resolver_cache: ResolverCache,
    live_queue: LiveUpdateQueue,
    handlers: HandlerRegistry,
    updated_record_ids: FxHashSet<DataId>,
    current_write_epoch: u64,
    global_invalidation_epoch: Option<u64>,
    roots: Roots,
    gc_holds: Vec<Disposable>,
    gc_scheduled: bool,
    subscriptions: Subscriptions,
    clock: Clock,
    config: StoreConfig,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("records", &self.base.size())
            .field("overlay", &self.overlay.as_ref().map(RecordSource::size))
            .field("write_epoch", &self.current_write_epoch)
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Store over `source` with default configuration and built-in handlers.
    #[must_use]
    pub fn new(source: RecordSource) -> Self {
        Self::builder().source(source).build()
    }

    /// Starts a [`StoreBuilder`].
    #[must_use]
    pub fn builder() -> StoreBuilder {
        StoreBuilder::default()
    }

    /// Read view: the overlay (when present) over the canonical source.
    pub fn source(&self) -> LayeredSource<'_> {
        LayeredSource::new(&self.base, self.overlay.as_ref())
    }

    /// Canonical records, ignoring any optimistic overlay.
    #[must_use]
    pub fn canonical_source(&self) -> &RecordSource {
        &self.base
    }

    /// Registered handle field handlers.
    #[must_use]
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Store configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Resolver memo table.
    #[must_use]
    pub fn resolver_cache(&self) -> &ResolverCache {
        &self.resolver_cache
    }

    /// Queue live resolver states report changes to.
    #[must_use]
    pub fn live_queue(&self) -> &LiveUpdateQueue {
        &self.live_queue
    }

    /// Number of completed notify passes.
    #[must_use]
    pub fn current_write_epoch(&self) -> u64 {
        self.current_write_epoch
    }

    /// Whether an optimistic overlay exists.
    #[must_use]
    pub fn has_snapshot(&self) -> bool {
        self.overlay.is_some()
    }

    /// Reads `selector` against the current (possibly optimistic) state.
    pub fn lookup(&mut self, selector: &Selector) -> Snapshot {
        let view = LayeredSource::new(&self.base, self.overlay.as_ref());
        read(&view, &mut self.resolver_cache, selector)
    }

    /// Subscribes `callback` to changes of `snapshot`'s selector.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> Disposable {
        self.subscriptions.subscribe(snapshot, Box::new(callback))
    }

    /// Merges `source` into the active target and stamps `invalidated_ids`.
    ///
    /// The target is the overlay when one exists, else the canonical source.
    /// Only records whose merged value differs are written and recorded as
    /// updated.
    pub fn publish(&mut self, source: &RecordSource, invalidated_ids: &FxHashSet<DataId>) {
        let invalidated_at = json!(self.current_write_epoch + 1);
        let mut invalidated: Vec<&DataId> = invalidated_ids.iter().collect();
        invalidated.sort();
        for id in invalidated {
            let current = match self.entry(id) {
                Some(RecordState::Existent(record)) => record.as_ref().clone(),
                _ => match source.get(id) {
                    Some(record) => record.as_ref().clone(),
                    None => continue,
                },
            };
            let mut next = current;
            next.set_value(INVALIDATED_AT_KEY, invalidated_at.clone());
            self.target().set(next);
            self.updated_record_ids.insert(id.clone());
        }

        for (id, state) in source.iter() {
            match state {
                RecordState::Existent(incoming) => {
                    let next = match self.entry(id) {
                        Some(RecordState::Existent(current)) => current.merged_with(incoming),
                        _ => Some(incoming.as_ref().clone()),
                    };
                    if let Some(next) = next {
                        self.target().set(next);
                        self.updated_record_ids.insert(id.clone());
                    }
                }
                RecordState::Nonexistent => {
                    if !matches!(self.entry(id), Some(RecordState::Nonexistent)) {
                        self.target().delete(id.clone());
                        self.updated_record_ids.insert(id.clone());
                    }
                }
            }
        }
    }

    /// Ends a write: bumps the write epoch, propagates live and resolver
    /// invalidations and re-reads affected subscriptions.
    ///
    /// Returns the owners of subscriptions whose snapshot changed.
    #[instrument(level = "debug", skip_all, fields(epoch = self.current_write_epoch + 1, updated = self.updated_record_ids.len()))]
    pub fn notify(
        &mut self,
        source_operation: Option<&OperationDescriptor>,
        invalidate_store: bool,
    ) -> Vec<RequestIdentifier> {
        self.current_write_epoch += 1;
        if invalidate_store {
            self.global_invalidation_epoch = Some(self.current_write_epoch);
        }
        if let Some(operation) = source_operation {
            let now = (self.clock)();
            self.roots.stamp(
                operation,
                self.current_write_epoch,
                now,
                self.config.gc_release_buffer_size,
            );
        }

        if !self.live_queue.is_batching() {
            for memo in self.live_queue.drain() {
                if self.resolver_cache.mark_live_dirty(&memo) {
                    self.updated_record_ids.insert(memo);
                }
            }
        }
        let deleted = self
            .resolver_cache
            .invalidate(self.updated_record_ids.iter());
        self.updated_record_ids.extend(deleted);

        let view = LayeredSource::new(&self.base, self.overlay.as_ref());
        let owners = self.subscriptions.update(
            &view,
            &mut self.resolver_cache,
            &self.updated_record_ids,
        );
        self.updated_record_ids.clear();

        self.release_disposed_roots();
        if self.gc_scheduled {
            self.gc();
        }
        owners
    }

    /// Creates the optimistic overlay and backs up subscription snapshots.
    pub fn snapshot(&mut self) -> Result<(), StoreError> {
        if self.overlay.is_some() {
            return Err(StoreError::SnapshotAlreadyTaken);
        }
        tracing::trace!("store snapshot");
        self.subscriptions
            .snapshot(&self.base, &mut self.resolver_cache);
        self.overlay = Some(RecordSource::new());
        self.resolver_cache.snapshot();
        Ok(())
    }

    /// Drops the optimistic overlay, returning reads to canonical state.
    pub fn restore(&mut self) -> Result<(), StoreError> {
        if self.overlay.take().is_none() {
            return Err(StoreError::RestoreWithoutSnapshot);
        }
        tracing::trace!("store restore");
        self.subscriptions.restore();
        self.resolver_cache.restore();
        Ok(())
    }

    /// Runs `f` with live notifications batched, then notifies once if any
    /// arrived.
    pub fn batch_live_state_updates(
        &mut self,
        f: impl FnOnce(),
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.live_queue.begin_batch()?;
        f();
        self.live_queue.end_batch();
        Ok(self.process_live_updates())
    }

    /// Notifies for live state changes reported outside of a batch.
    pub fn process_live_updates(&mut self) -> Vec<RequestIdentifier> {
        if self.live_queue.is_batching() || !self.live_queue.has_pending() {
            return Vec::new();
        }
        self.notify(None, false)
    }

    fn entry(&self, id: &DataId) -> Option<&RecordState> {
        self.overlay
            .as_ref()
            .and_then(|overlay| overlay.entry(id))
            .or_else(|| self.base.entry(id))
    }

    fn target(&mut self) -> &mut RecordSource {
        match self.overlay.as_mut() {
            Some(overlay) => overlay,
            None => &mut self.base,
        }
    }

    fn now(&self) -> u64 {
        (self.clock)()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::selector::{Fragment, Selection, Variables};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn user(id: &str, name: &str) -> Record {
        let mut r = Record::new(DataId::new(id), "User");
        r.set_value("name", json!(name));
        r
    }

    fn name_selector(id: &str) -> Selector {
        Selector::new(
            DataId::new(id),
            Arc::new(Fragment::new("UserName", vec![Selection::scalar("name")])),
            Variables::new(),
        )
    }

    #[test]
    fn publish_merges_and_records_only_changed_ids() {
        let mut store = Store::new(RecordSource::from_records([user("1", "Alice")]));
        store.publish(
            &RecordSource::from_records([user("1", "Alice")]),
            &FxHashSet::default(),
        );
        assert!(store.updated_record_ids.is_empty());
        store.publish(
            &RecordSource::from_records([user("1", "Alicia")]),
            &FxHashSet::default(),
        );
        assert!(store.updated_record_ids.contains(&DataId::new("1")));
    }

    #[test]
    fn overlay_writes_disappear_on_restore() {
        let mut store = Store::new(RecordSource::from_records([user("1", "Alice")]));
        store.snapshot().unwrap();
        assert_eq!(store.snapshot(), Err(StoreError::SnapshotAlreadyTaken));
        store.publish(
            &RecordSource::from_records([user("1", "Bob")]),
            &FxHashSet::default(),
        );
        assert_eq!(store.lookup(&name_selector("1")).data, json!({ "name": "Bob" }));
        assert_eq!(
            store
                .canonical_source()
                .get(&DataId::new("1"))
                .unwrap()
                .get_value("name"),
            Some(&json!("Alice"))
        );
        store.restore().unwrap();
        assert_eq!(store.restore(), Err(StoreError::RestoreWithoutSnapshot));
        assert_eq!(store.lookup(&name_selector("1")).data, json!({ "name": "Alice" }));
    }

    #[test]
    fn notify_fires_only_overlapping_changed_subscriptions() {
        let mut store = Store::new(RecordSource::from_records([
            user("1", "Alice"),
            user("2", "Bea"),
        ]));
        let fired = Rc::new(RefCell::new(Vec::new()));
        for id in ["1", "2"] {
            let snapshot = store.lookup(&name_selector(id));
            let log = Rc::clone(&fired);
            store.subscribe(snapshot, move |s| log.borrow_mut().push(s.data.clone()));
        }
        store.publish(
            &RecordSource::from_records([user("1", "Alicia")]),
            &FxHashSet::default(),
        );
        store.notify(None, false);
        assert_eq!(*fired.borrow(), vec![json!({ "name": "Alicia" })]);
        assert_eq!(store.current_write_epoch(), 1);
    }

    #[test]
    fn invalidated_records_are_stamped_with_the_next_epoch() {
        let mut store = Store::new(RecordSource::from_records([user("1", "Alice")]));
        let mut ids = FxHashSet::default();
        ids.insert(DataId::new("1"));
        store.publish(&RecordSource::new(), &ids);
        store.notify(None, false);
        let record = store.source().get(&DataId::new("1")).cloned().unwrap();
        assert_eq!(record.invalidated_at(), Some(1));
    }
}
