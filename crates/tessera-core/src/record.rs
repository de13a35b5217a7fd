// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Normalized record type.
use std::collections::BTreeMap;

use serde_json::Value;

use crate::ident::DataId;

/// Reserved key reading a record's own id.
pub const ID_KEY: &str = "__id";
/// Reserved key reading a record's type name.
pub const TYPENAME_KEY: &str = "__typename";
/// Reserved key holding the write epoch at which the record was invalidated.
pub const INVALIDATED_AT_KEY: &str = "__invalidated_at";

/// Value stored under one storage key of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Any JSON scalar, scalar list or explicit `null`.
    Scalar(Value),
    /// Reference to another record.
    Link(DataId),
    /// Ordered references to other records; entries may be null.
    Links(Vec<Option<DataId>>),
}

impl FieldValue {
    /// Explicit null.
    pub const NULL: Self = Self::Scalar(Value::Null);

    /// Returns `true` for an explicit null scalar.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Scalar(Value::Null))
    }
}

/// Materialised record for a single entity.
///
/// Invariants
/// - `id` equals the key the record is stored under in its source.
/// - Records are shared behind `Arc` once published; writers clone on first
///   write (see [`crate::RecordSourceMutator`]), so a record observed by a
///   reader never changes underneath it.
/// - Reserved keys (`__id`, `__typename`) are not stored in `fields`.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    id: DataId,
    typename: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Creates an empty record of `typename`.
    #[must_use]
    pub fn new(id: DataId, typename: impl Into<String>) -> Self {
        Self {
            id,
            typename: typename.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Returns the record id.
    #[must_use]
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Returns the record's type name.
    #[must_use]
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// Returns the raw value under `storage_key`, `None` when never written.
    #[must_use]
    pub fn get(&self, storage_key: &str) -> Option<&FieldValue> {
        self.fields.get(storage_key)
    }

    /// Returns the scalar under `storage_key`.
    ///
    /// `None` when the key was never written or holds a link.
    #[must_use]
    pub fn get_value(&self, storage_key: &str) -> Option<&Value> {
        match self.fields.get(storage_key) {
            Some(FieldValue::Scalar(v)) => Some(v),
            _ => None,
        }
    }

    /// Linked id under `storage_key`; `Some(None)` for an explicit null.
    #[must_use]
    pub fn get_linked_record_id(&self, storage_key: &str) -> Option<Option<&DataId>> {
        match self.fields.get(storage_key)? {
            FieldValue::Link(id) => Some(Some(id)),
            FieldValue::Scalar(Value::Null) => Some(None),
            _ => None,
        }
    }

    /// Plural linked ids under `storage_key`; `Some(None)` for an explicit null.
    #[must_use]
    pub fn get_linked_record_ids(&self, storage_key: &str) -> Option<Option<&[Option<DataId>]>> {
        match self.fields.get(storage_key)? {
            FieldValue::Links(ids) => Some(Some(ids.as_slice())),
            FieldValue::Scalar(Value::Null) => Some(None),
            _ => None,
        }
    }

    /// Writes `value` under `storage_key`.
    pub fn set(&mut self, storage_key: impl Into<String>, value: FieldValue) {
        self.fields.insert(storage_key.into(), value);
    }

    /// Writes a scalar under `storage_key`.
    pub fn set_value(&mut self, storage_key: impl Into<String>, value: Value) {
        self.set(storage_key, FieldValue::Scalar(value));
    }

    /// Writes a link under `storage_key`.
    pub fn set_linked_record_id(&mut self, storage_key: impl Into<String>, id: DataId) {
        self.set(storage_key, FieldValue::Link(id));
    }

    /// Writes plural links under `storage_key`.
    pub fn set_linked_record_ids(
        &mut self,
        storage_key: impl Into<String>,
        ids: Vec<Option<DataId>>,
    ) {
        self.set(storage_key, FieldValue::Links(ids));
    }

    /// Removes `storage_key`, returning it to the "never written" state.
    pub fn remove(&mut self, storage_key: &str) -> Option<FieldValue> {
        self.fields.remove(storage_key)
    }

    /// Iterates stored fields in key order.
    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    /// Copies every field of `source` onto `self`, keeping `self`'s identity.
    pub fn copy_fields_from(&mut self, source: &Self) {
        for (k, v) in &source.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Write epoch at which the record was last invalidated.
    #[must_use]
    pub fn invalidated_at(&self) -> Option<u64> {
        self.get_value(INVALIDATED_AT_KEY).and_then(Value::as_u64)
    }

    /// Merges `next` over `self`, returning `None` when nothing changed.
    ///
    /// The merged record keeps `self`'s id; `next`'s type name wins.
    #[must_use]
    pub fn merged_with(&self, next: &Self) -> Option<Self> {
        let changed = self.typename != next.typename
            || next
                .fields
                .iter()
                .any(|(k, v)| self.fields.get(k) != Some(v));
        if !changed {
            return None;
        }
        let mut merged = self.clone();
        merged.typename.clone_from(&next.typename);
        merged.copy_fields_from(next);
        Some(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn link_accessors_distinguish_null_from_unset() {
        let mut r = Record::new(DataId::new("1"), "User");
        assert_eq!(r.get_linked_record_id("friend"), None);
        r.set("friend", FieldValue::NULL);
        assert_eq!(r.get_linked_record_id("friend"), Some(None));
        r.set_linked_record_id("friend", DataId::new("2"));
        assert_eq!(
            r.get_linked_record_id("friend"),
            Some(Some(&DataId::new("2")))
        );
        assert_eq!(r.get_value("friend"), None);
    }

    #[test]
    fn merge_reports_no_change_for_identical_fields() {
        let mut a = Record::new(DataId::new("1"), "User");
        a.set_value("name", json!("Alice"));
        let b = a.clone();
        assert!(a.merged_with(&b).is_none());

        let mut c = Record::new(DataId::new("1"), "User");
        c.set_value("age", json!(30));
        let merged = a.merged_with(&c);
        assert!(merged.is_some());
        let merged = merged.unwrap_or_else(|| a.clone());
        assert_eq!(merged.get_value("name"), Some(&json!("Alice")));
        assert_eq!(merged.get_value("age"), Some(&json!(30)));
    }
}
