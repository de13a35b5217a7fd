// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Copy-on-write mutator over a base source and a sink.
use std::sync::Arc;

use serde_json::Value;

use crate::error::StoreError;
use crate::ident::DataId;
use crate::record::{FieldValue, Record};
use crate::source::{LayeredSource, RecordSource, RecordSourceView, RecordState, RecordStatus};

/// Composes a read-only `base` with a writable `sink`.
///
/// Reads check the sink first and fall back to the base. Writes always land
/// in the sink: the first write to a base record copies it into the sink, so
/// the base is never mutated. Publishing the sink afterwards applies the
/// whole delta at once.
pub struct RecordSourceMutator<'a> {
    base: &'a dyn RecordSourceView,
    sink: &'a mut RecordSource,
}

impl std::fmt::Debug for RecordSourceMutator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSourceMutator")
            .field("sink_size", &self.sink.size())
            .finish_non_exhaustive()
    }
}

impl<'a> RecordSourceMutator<'a> {
    /// Creates a mutator writing into `sink`.
    pub fn new(base: &'a dyn RecordSourceView, sink: &'a mut RecordSource) -> Self {
        Self { base, sink }
    }

    /// Read view combining sink and base.
    pub fn view(&self) -> LayeredSource<'_> {
        LayeredSource::new(self.base, Some(&*self.sink))
    }

    /// Returns the record for `id` if it exists in sink or base.
    pub fn get(&self, id: &DataId) -> Option<&Arc<Record>> {
        match self.sink.entry(id) {
            Some(RecordState::Existent(record)) => Some(record),
            Some(RecordState::Nonexistent) => None,
            None => self.base.get(id),
        }
    }

    /// Existence of `id` through the sink.
    pub fn status(&self, id: &DataId) -> RecordStatus {
        match self.sink.status(id) {
            RecordStatus::Unknown => self.base.status(id),
            status => status,
        }
    }

    /// Type name of `id`.
    pub fn get_type(&self, id: &DataId) -> Option<&str> {
        self.get(id).map(|r| r.typename())
    }

    /// Scalar stored on `id` under `key`.
    pub fn get_value(&self, id: &DataId, key: &str) -> Option<&Value> {
        self.get(id).and_then(|r| r.get_value(key))
    }

    /// Raw field stored on `id` under `key`.
    pub fn get_field(&self, id: &DataId, key: &str) -> Option<&FieldValue> {
        self.get(id).and_then(|r| r.get(key))
    }

    /// Link stored on `id` under `key`; `Some(None)` for an explicit null.
    pub fn get_linked_record_id(&self, id: &DataId, key: &str) -> Option<Option<DataId>> {
        self.get(id)
            .and_then(|r| r.get_linked_record_id(key))
            .map(|link| link.cloned())
    }

    /// Plural links stored on `id` under `key`; `Some(None)` for an explicit null.
    pub fn get_linked_record_ids(
        &self,
        id: &DataId,
        key: &str,
    ) -> Option<Option<Vec<Option<DataId>>>> {
        self.get(id)
            .and_then(|r| r.get_linked_record_ids(key))
            .map(|links| links.map(<[Option<DataId>]>::to_vec))
    }

    /// Writes a fresh, empty record into the sink.
    pub fn create(&mut self, id: DataId, typename: &str) {
        self.sink.set(Record::new(id, typename));
    }

    /// Writes a tombstone for `id` into the sink.
    pub fn delete(&mut self, id: DataId) {
        self.sink.delete(id);
    }

    /// Sets a raw field on `id`.
    pub fn set_field(&mut self, id: &DataId, key: &str, value: FieldValue) -> Result<(), StoreError> {
        self.sink_record(id)?.set(key, value);
        Ok(())
    }

    /// Sets a scalar on `id`.
    pub fn set_value(&mut self, id: &DataId, key: &str, value: Value) -> Result<(), StoreError> {
        self.set_field(id, key, FieldValue::Scalar(value))
    }

    /// Sets a link on `id`.
    pub fn set_linked_record_id(
        &mut self,
        id: &DataId,
        key: &str,
        target: DataId,
    ) -> Result<(), StoreError> {
        self.set_field(id, key, FieldValue::Link(target))
    }

    /// Sets plural links on `id`.
    pub fn set_linked_record_ids(
        &mut self,
        id: &DataId,
        key: &str,
        targets: Vec<Option<DataId>>,
    ) -> Result<(), StoreError> {
        self.set_field(id, key, FieldValue::Links(targets))
    }

    /// Copies every field of `from` onto `to` (both read through the sink).
    pub fn copy_fields(&mut self, from: &DataId, to: &DataId) -> Result<(), StoreError> {
        let source = self
            .get(from)
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound(from.clone()))?;
        self.copy_fields_from_record(&source, to)
    }

    /// Copies every field of `record` onto `to`.
    pub fn copy_fields_from_record(&mut self, record: &Record, to: &DataId) -> Result<(), StoreError> {
        self.sink_record(to)?.copy_fields_from(record);
        Ok(())
    }

    /// Returns the sink's writable copy of `id`, copying it from the base on
    /// first write.
    fn sink_record(&mut self, id: &DataId) -> Result<&mut Record, StoreError> {
        if !matches!(self.sink.entry(id), Some(RecordState::Existent(_))) {
            if matches!(self.sink.entry(id), Some(RecordState::Nonexistent)) {
                return Err(StoreError::RecordNotFound(id.clone()));
            }
            let base = self
                .base
                .get(id)
                .cloned()
                .ok_or_else(|| StoreError::RecordNotFound(id.clone()))?;
            self.sink.set_shared(base);
        }
        self.sink
            .get_mut(id)
            .ok_or_else(|| StoreError::RecordNotFound(id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn base() -> RecordSource {
        let mut user = Record::new(DataId::new("1"), "User");
        user.set_value("name", json!("Alice"));
        RecordSource::from_records([user])
    }

    #[test]
    fn writes_go_to_sink_and_leave_base_untouched() {
        let base = base();
        let mut sink = RecordSource::new();
        {
            let mut mutator = RecordSourceMutator::new(&base, &mut sink);
            mutator
                .set_value(&DataId::new("1"), "name", json!("Bob"))
                .unwrap();
            assert_eq!(
                mutator.get_value(&DataId::new("1"), "name"),
                Some(&json!("Bob"))
            );
        }
        assert_eq!(
            base.get(&DataId::new("1")).unwrap().get_value("name"),
            Some(&json!("Alice"))
        );
        assert_eq!(
            sink.get(&DataId::new("1")).unwrap().get_value("name"),
            Some(&json!("Bob"))
        );
    }

    #[test]
    fn deleted_records_hide_base_and_reject_writes() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        mutator.delete(DataId::new("1"));
        assert_eq!(mutator.status(&DataId::new("1")), RecordStatus::Nonexistent);
        let err = mutator
            .set_value(&DataId::new("1"), "name", json!("x"))
            .unwrap_err();
        assert_eq!(err, StoreError::RecordNotFound(DataId::new("1")));
    }

    #[test]
    fn copy_fields_merges_onto_target() {
        let base = base();
        let mut sink = RecordSource::new();
        let mut mutator = RecordSourceMutator::new(&base, &mut sink);
        mutator.create(DataId::new("2"), "User");
        mutator
            .copy_fields(&DataId::new("1"), &DataId::new("2"))
            .unwrap();
        assert_eq!(
            mutator.get_value(&DataId::new("2"), "name"),
            Some(&json!("Alice"))
        );
        assert_eq!(mutator.get_type(&DataId::new("2")), Some("User"));
    }
}
