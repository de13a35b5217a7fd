// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot subscriptions and their optimistic backups.
use rustc_hash::FxHashSet;

use crate::disposable::Disposable;
use crate::ident::{DataId, RequestIdentifier};
use crate::reader::{read, Snapshot};
use crate::resolver::ResolverCache;
use crate::source::RecordSourceView;

/// Callback invoked with the new snapshot when a subscription changes.
pub type SubscriptionCallback = Box<dyn FnMut(&Snapshot)>;

struct Subscription {
    snapshot: Snapshot,
    backup: Option<Snapshot>,
    stale: bool,
    callback: SubscriptionCallback,
    handle: Disposable,
}

/// Subscriptions owned by the store.
#[derive(Default)]
pub(crate) struct Subscriptions {
    entries: Vec<Subscription>,
}

impl Subscriptions {
    pub(crate) fn subscribe(&mut self, snapshot: Snapshot, callback: SubscriptionCallback) -> Disposable {
        let handle = Disposable::new();
        self.entries.push(Subscription {
            snapshot,
            backup: None,
            stale: false,
            callback,
            handle: handle.clone(),
        });
        handle
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.iter().filter(|s| !s.handle.is_disposed()).count()
    }

    /// Backs up every snapshot before an optimistic overlay is created.
    ///
    /// A stale subscription still holds data from the previous overlay, so
    /// its backup is read fresh from the canonical `source`. The stale flag
    /// stays set; the next update re-reads it against the new overlay.
    pub(crate) fn snapshot(&mut self, source: &dyn RecordSourceView, cache: &mut ResolverCache) {
        for entry in &mut self.entries {
            if entry.handle.is_disposed() {
                continue;
            }
            let backup = if entry.stale {
                read(source, cache, &entry.snapshot.selector)
            } else {
                entry.snapshot.clone()
            };
            entry.backup = Some(backup);
        }
    }

    /// Rolls metadata back to the backups taken at [`Self::snapshot`].
    ///
    /// The current (possibly optimistic) data is kept so the next update can
    /// tell whether the rebased data differs; a subscription whose data
    /// diverged from its backup, or which has no backup, is marked stale and
    /// re-read unconditionally.
    pub(crate) fn restore(&mut self) {
        for entry in &mut self.entries {
            match entry.backup.take() {
                Some(backup) => {
                    if backup.data != entry.snapshot.data {
                        entry.stale = true;
                    }
                    entry.snapshot = Snapshot {
                        data: std::mem::take(&mut entry.snapshot.data),
                        ..backup
                    };
                }
                None => entry.stale = true,
            }
        }
    }

    /// Re-reads stale subscriptions and those that saw an updated id, firing
    /// callbacks whose snapshot changed. Returns the owners of changed
    /// snapshots.
    pub(crate) fn update(
        &mut self,
        source: &dyn RecordSourceView,
        cache: &mut ResolverCache,
        updated: &FxHashSet<DataId>,
    ) -> Vec<RequestIdentifier> {
        self.entries.retain(|s| !s.handle.is_disposed());
        let mut owners: Vec<RequestIdentifier> = Vec::new();
        for entry in &mut self.entries {
            if entry.handle.is_disposed() {
                continue;
            }
            let overlaps = entry
                .snapshot
                .seen_records
                .iter()
                .any(|id| updated.contains(id));
            if !entry.stale && !overlaps {
                continue;
            }
            entry.stale = false;
            let next = read(source, cache, &entry.snapshot.selector);
            let changed = next.data != entry.snapshot.data
                || next.is_missing_data != entry.snapshot.is_missing_data
                || next.field_errors != entry.snapshot.field_errors
                || next.missing_live_resolver_fields
                    != entry.snapshot.missing_live_resolver_fields;
            entry.snapshot = next;
            if changed {
                (entry.callback)(&entry.snapshot);
                if let Some(owner) = entry.snapshot.selector.owner.as_ref() {
                    if !owners.contains(owner) {
                        owners.push(owner.clone());
                    }
                }
            }
        }
        owners
    }
}
