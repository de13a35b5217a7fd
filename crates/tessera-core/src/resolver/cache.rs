// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Memoized resolver values.
//!
//! The first read of resolver field `K` on record `R` evaluates the resolver
//! and stores the outcome under the memo id `client:R:K`, linked from
//! `(R, K)`. The memo registers `Delete{memo}` against every record its
//! fragment read and `Unlink{R, K}` against `R`, so a later change to any of
//! them discards exactly the memos that depended on it.
//!
//! Memos evaluated while the store has an optimistic overlay are tracked and
//! discarded on restore, since they may have observed optimistic data.
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;

use super::dependency_graph::{DependencyGraph, Instruction};
use super::live::{LiveState, LiveUpdateQueue, LiveValue};
use super::{Resolver, ResolverContext, ResolverError, ResolverId, ResolverRegistry};
use crate::ident::{generate_client_id, DataId};
use crate::selector::Variables;

/// What a read of a resolver field observes.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolverOutcome {
    /// Memo id the outcome is stored under.
    pub memo_id: DataId,
    /// Value; null on error, missing fragment data or pending live state.
    pub value: Value,
    /// Error reported by the resolver or its live state.
    pub error: Option<ResolverError>,
    /// The resolver's fragment was missing data.
    pub is_missing_data: bool,
    /// A live state has no value yet.
    pub is_pending: bool,
    /// Records the resolver's fragment read.
    pub seen: Vec<DataId>,
}

/// Result of reading a resolver's fragment, handed to [`ResolverCache::evaluate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FragmentRead {
    /// Fragment data passed to the resolver.
    pub data: Value,
    /// Records the fragment read.
    pub seen: FxHashSet<DataId>,
    /// Whether the fragment was missing data.
    pub is_missing_data: bool,
}

struct LiveEntry {
    state: Box<dyn LiveState>,
    unsubscribe: Option<Box<dyn FnOnce()>>,
    dirty: bool,
}

impl Drop for LiveEntry {
    fn drop(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

struct Memo {
    owner: DataId,
    field: String,
    value: Value,
    error: Option<ResolverError>,
    is_missing_data: bool,
    is_pending: bool,
    seen: Vec<DataId>,
    live: Option<LiveEntry>,
}

impl Memo {
    fn outcome(&self, memo_id: &DataId) -> ResolverOutcome {
        ResolverOutcome {
            memo_id: memo_id.clone(),
            value: self.value.clone(),
            error: self.error.clone(),
            is_missing_data: self.is_missing_data,
            is_pending: self.is_pending,
            seen: self.seen.clone(),
        }
    }

    fn apply_live_value(&mut self, value: LiveValue) {
        let (value, error, pending) = split_live_value(value);
        self.value = value;
        self.error = error;
        self.is_pending = pending;
    }
}

fn split_live_value(value: LiveValue) -> (Value, Option<ResolverError>, bool) {
    match value {
        LiveValue::Value(v) => (v, None, false),
        LiveValue::Pending => (Value::Null, None, true),
        LiveValue::Error(e) => (Value::Null, Some(e), false),
    }
}

/// Memo table plus the dependency graph that invalidates it.
pub struct ResolverCache {
    registry: ResolverRegistry,
    context: ResolverContext,
    live_queue: LiveUpdateQueue,
    links: FxHashMap<(DataId, String), DataId>,
    memos: FxHashMap<DataId, Memo>,
    graph: DependencyGraph,
    overlay_memos: Option<FxHashSet<DataId>>,
    evaluations: u64,
}

impl std::fmt::Debug for ResolverCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolverCache")
            .field("memos", &self.memos.len())
            .field("links", &self.links.len())
            .field("evaluations", &self.evaluations)
            .field("overlay", &self.overlay_memos.is_some())
            .finish_non_exhaustive()
    }
}

impl ResolverCache {
    /// Creates an empty cache serving `registry`.
    #[must_use]
    pub fn new(
        registry: ResolverRegistry,
        context: ResolverContext,
        live_queue: LiveUpdateQueue,
    ) -> Self {
        Self {
            registry,
            context,
            live_queue,
            links: FxHashMap::default(),
            memos: FxHashMap::default(),
            graph: DependencyGraph::new(),
            overlay_memos: None,
            evaluations: 0,
        }
    }

    /// Registered resolvers.
    #[must_use]
    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Context passed to every resolver.
    #[must_use]
    pub fn context(&self) -> &ResolverContext {
        &self.context
    }

    /// Returns the memoized outcome of `field` on `owner`, if still valid.
    ///
    /// A live memo flagged by a notification re-reads its live state here;
    /// the resolver itself is not invoked again.
    pub fn lookup(&mut self, owner: &DataId, field: &str) -> Option<ResolverOutcome> {
        let memo_id = self.links.get(&(owner.clone(), field.to_owned()))?.clone();
        let memo = self.memos.get_mut(&memo_id)?;
        if let Some(live) = memo.live.as_mut() {
            if live.dirty {
                live.dirty = false;
                let value = live.state.read();
                memo.apply_live_value(value);
            }
        }
        Some(memo.outcome(&memo_id))
    }

    /// Evaluates `resolver` for `field` on `owner` and memoizes the outcome.
    ///
    /// The resolver is not invoked when the fragment is missing data; the
    /// outcome is then null and flagged missing.
    pub fn evaluate(
        &mut self,
        owner: &DataId,
        field: &str,
        resolver: &ResolverId,
        args: &Variables,
        fragment: FragmentRead,
    ) -> ResolverOutcome {
        let memo_id = generate_client_id(owner, field, None);
        self.discard(&memo_id);

        let mut live = None;
        let (value, error, is_pending) = if fragment.is_missing_data {
            (Value::Null, None, false)
        } else {
            self.evaluations += 1;
            match self.registry.get(resolver).cloned() {
                None => (Value::Null, Some(ResolverError::Unknown(resolver.clone())), false),
                Some(Resolver::Plain(f)) => match f(&fragment.data, args, &self.context) {
                    Ok(v) => (v, None, false),
                    Err(e) => (Value::Null, Some(e), false),
                },
                Some(Resolver::Live(f)) => match f(&fragment.data, args, &self.context) {
                    Ok(state) => {
                        let current = split_live_value(state.read());
                        let unsubscribe = state.subscribe(self.live_queue.notifier(memo_id.clone()));
                        live = Some(LiveEntry {
                            state,
                            unsubscribe: Some(unsubscribe),
                            dirty: false,
                        });
                        current
                    }
                    Err(e) => (Value::Null, Some(e), false),
                },
            }
        };
        tracing::trace!(memo = %memo_id, %resolver, missing = fragment.is_missing_data, "resolver evaluated");

        let mut seen: Vec<DataId> = fragment.seen.into_iter().collect();
        seen.sort();
        for upstream in &seen {
            self.graph.register(
                &memo_id,
                upstream.clone(),
                Instruction::Delete {
                    record: memo_id.clone(),
                },
            );
        }
        self.graph.register(
            &memo_id,
            owner.clone(),
            Instruction::Unlink {
                record: owner.clone(),
                field: field.to_owned(),
            },
        );
        self.links
            .insert((owner.clone(), field.to_owned()), memo_id.clone());
        if let Some(created) = self.overlay_memos.as_mut() {
            created.insert(memo_id.clone());
        }
        let memo = Memo {
            owner: owner.clone(),
            field: field.to_owned(),
            value,
            error,
            is_missing_data: fragment.is_missing_data,
            is_pending,
            seen,
            live,
        };
        let outcome = memo.outcome(&memo_id);
        self.memos.insert(memo_id, memo);
        outcome
    }

    /// Applies the instructions triggered by `updated` and returns the memo
    /// ids that were deleted.
    pub fn invalidate<'i>(&mut self, updated: impl IntoIterator<Item = &'i DataId>) -> Vec<DataId> {
        let instructions = self.graph.get_instructions_for_updated_ids(updated);
        let mut deleted = Vec::new();
        for instruction in instructions {
            match instruction {
                Instruction::Unlink { record, field } => {
                    self.links.remove(&(record, field));
                }
                Instruction::Delete { record } => {
                    if self.discard(&record) {
                        deleted.push(record);
                    }
                }
            }
        }
        if !deleted.is_empty() {
            tracing::debug!(count = deleted.len(), "resolver memos invalidated");
        }
        deleted
    }

    /// Flags the live memo `memo_id` for a re-read; `false` when it is gone.
    pub fn mark_live_dirty(&mut self, memo_id: &DataId) -> bool {
        match self.memos.get_mut(memo_id).and_then(|m| m.live.as_mut()) {
            Some(live) => {
                live.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Starts tracking memos evaluated under an optimistic overlay.
    pub fn snapshot(&mut self) {
        self.overlay_memos = Some(FxHashSet::default());
    }

    /// Discards every memo evaluated since [`Self::snapshot`].
    pub fn restore(&mut self) {
        let Some(created) = self.overlay_memos.take() else {
            return;
        };
        for memo_id in &created {
            self.discard(memo_id);
        }
    }

    /// Drops memos whose owning record no longer satisfies `keep`.
    pub fn retain_backing(&mut self, keep: impl Fn(&DataId) -> bool) {
        let doomed: Vec<DataId> = self
            .memos
            .iter()
            .filter(|(_, memo)| !keep(&memo.owner))
            .map(|(id, _)| id.clone())
            .collect();
        for memo_id in &doomed {
            self.discard(memo_id);
        }
    }

    /// Whether `memo_id` holds a memo.
    #[must_use]
    pub fn contains(&self, memo_id: &DataId) -> bool {
        self.memos.contains_key(memo_id)
    }

    /// Number of memos.
    #[must_use]
    pub fn len(&self) -> usize {
        self.memos.len()
    }

    /// Returns `true` when nothing is memoized.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }

    /// Number of resolver invocations so far.
    #[must_use]
    pub fn evaluations(&self) -> u64 {
        self.evaluations
    }

    fn discard(&mut self, memo_id: &DataId) -> bool {
        self.graph.remove_owner(memo_id);
        let Some(memo) = self.memos.remove(memo_id) else {
            return false;
        };
        let key = (memo.owner, memo.field);
        if self.links.get(&key) == Some(memo_id) {
            self.links.remove(&key);
        }
        true
    }
}
