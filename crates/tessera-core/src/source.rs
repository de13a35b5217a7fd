// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record sources: the id → record containers and their read-only views.
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::ident::DataId;
use crate::record::Record;

/// Entry a source holds for one id.
#[derive(Clone, Debug, PartialEq)]
pub enum RecordState {
    /// The record exists.
    Existent(Arc<Record>),
    /// Tombstone: the record is known not to exist.
    Nonexistent,
}

/// Existence of a record as seen through a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordStatus {
    /// The record exists.
    Existent,
    /// The record was deleted or is known to be absent.
    Nonexistent,
    /// Nothing is known about the record.
    Unknown,
}

/// Read-only access to records.
///
/// Implemented by [`RecordSource`] and by [`LayeredSource`], which checks a
/// delta before falling back to its base. Readers, the data checker and the
/// mutator only ever observe records through this seam.
pub trait RecordSourceView {
    /// Returns the entry stored for `id`, `None` when unknown.
    fn entry(&self, id: &DataId) -> Option<&RecordState>;

    /// Returns the record for `id` if it exists.
    fn get(&self, id: &DataId) -> Option<&Arc<Record>> {
        match self.entry(id) {
            Some(RecordState::Existent(record)) => Some(record),
            _ => None,
        }
    }

    /// Returns the existence status of `id`.
    fn status(&self, id: &DataId) -> RecordStatus {
        match self.entry(id) {
            Some(RecordState::Existent(_)) => RecordStatus::Existent,
            Some(RecordState::Nonexistent) => RecordStatus::Nonexistent,
            None => RecordStatus::Unknown,
        }
    }

    /// Returns `true` when an entry (record or tombstone) exists for `id`.
    fn has(&self, id: &DataId) -> bool {
        self.entry(id).is_some()
    }
}

/// Mapping from [`DataId`] to record or tombstone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordSource {
    records: FxHashMap<DataId, RecordState>,
}

impl RecordSource {
    /// Creates an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a source from records.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut source = Self::new();
        for record in records {
            source.set(record);
        }
        source
    }

    /// Stores `record` under its own id, replacing any previous entry.
    pub fn set(&mut self, record: Record) {
        let id = record.id().clone();
        self.records
            .insert(id, RecordState::Existent(Arc::new(record)));
    }

    /// Stores an already shared record.
    pub fn set_shared(&mut self, record: Arc<Record>) {
        let id = record.id().clone();
        self.records.insert(id, RecordState::Existent(record));
    }

    /// Writes a tombstone for `id`.
    pub fn delete(&mut self, id: DataId) {
        self.records.insert(id, RecordState::Nonexistent);
    }

    /// Forgets `id` entirely, returning it to the unknown state.
    pub fn remove(&mut self, id: &DataId) -> Option<RecordState> {
        self.records.remove(id)
    }

    /// Inserts a raw entry.
    pub fn insert_entry(&mut self, id: DataId, state: RecordState) {
        self.records.insert(id, state);
    }

    /// Mutable access to an existing record, cloning it first if shared.
    pub fn get_mut(&mut self, id: &DataId) -> Option<&mut Record> {
        match self.records.get_mut(id) {
            Some(RecordState::Existent(record)) => Some(Arc::make_mut(record)),
            _ => None,
        }
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Number of entries, tombstones included.
    #[must_use]
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` when the source holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates ids in unspecified order.
    pub fn ids(&self) -> impl Iterator<Item = &DataId> {
        self.records.keys()
    }

    /// Iterates entries in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&DataId, &RecordState)> {
        self.records.iter()
    }

    /// Keeps only the entries for which `keep` returns `true`.
    pub fn retain(&mut self, mut keep: impl FnMut(&DataId) -> bool) {
        self.records.retain(|id, _| keep(id));
    }

    /// Returns ids sorted, for deterministic iteration in tests and logs.
    #[must_use]
    pub fn sorted_ids(&self) -> Vec<DataId> {
        let mut ids: Vec<DataId> = self.records.keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl RecordSourceView for RecordSource {
    fn entry(&self, id: &DataId) -> Option<&RecordState> {
        self.records.get(id)
    }
}

impl IntoIterator for RecordSource {
    type Item = (DataId, RecordState);
    type IntoIter = std::collections::hash_map::IntoIter<DataId, RecordState>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

/// Two-level view: `delta` entries shadow `base` entries.
///
/// Used both for the mutator (sink over base) and for the store's optimistic
/// overlay (overlay over canonical).
#[derive(Clone, Copy)]
pub struct LayeredSource<'a> {
    base: &'a dyn RecordSourceView,
    delta: Option<&'a RecordSource>,
}

impl<'a> LayeredSource<'a> {
    /// Creates a view reading `delta` first, then `base`.
    #[must_use]
    pub fn new(base: &'a dyn RecordSourceView, delta: Option<&'a RecordSource>) -> Self {
        Self { base, delta }
    }
}

impl std::fmt::Debug for LayeredSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayeredSource")
            .field("delta_size", &self.delta.map(RecordSource::size))
            .finish_non_exhaustive()
    }
}

impl RecordSourceView for LayeredSource<'_> {
    fn entry(&self, id: &DataId) -> Option<&RecordState> {
        if let Some(state) = self.delta.and_then(|d| d.entry(id)) {
            return Some(state);
        }
        self.base.entry(id)
    }
}
