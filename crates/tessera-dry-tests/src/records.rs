// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Record and source builders for tests.

use serde_json::Value;
use tessera_core::{DataId, FieldValue, Record, RecordSource};

/// Builder for a single [`Record`].
///
/// # Example
///
/// ```
/// use tessera_dry_tests::RecordBuilder;
///
/// let record = RecordBuilder::new("4", "User")
///     .scalar("name", serde_json::json!("Alice"))
///     .link("bestFriend", "5")
///     .build();
///
/// assert_eq!(record.typename(), "User");
/// assert_eq!(record.get_value("name"), Some(&serde_json::json!("Alice")));
/// ```
#[derive(Clone, Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl RecordBuilder {
    /// Start a record with the given id and type name.
    pub fn new(id: &str, typename: &str) -> Self {
        Self {
            record: Record::new(DataId::new(id), typename),
        }
    }

    /// Start the root record.
    pub fn root() -> Self {
        Self {
            record: Record::new(DataId::root(), tessera_core::ROOT_TYPE),
        }
    }

    /// Set a scalar field.
    pub fn scalar(mut self, key: &str, value: Value) -> Self {
        self.record.set_value(key, value);
        self
    }

    /// Set a link field.
    pub fn link(mut self, key: &str, target: &str) -> Self {
        self.record.set_linked_record_id(key, DataId::new(target));
        self
    }

    /// Set a plural link field; `None` entries are null links.
    pub fn links(mut self, key: &str, targets: &[Option<&str>]) -> Self {
        let ids = targets.iter().map(|t| t.map(DataId::new)).collect();
        self.record.set_linked_record_ids(key, ids);
        self
    }

    /// Set an explicit null.
    pub fn null(mut self, key: &str) -> Self {
        self.record.set(key, FieldValue::NULL);
        self
    }

    /// Finish the record.
    pub fn build(self) -> Record {
        self.record
    }
}

/// Builder for a [`RecordSource`].
#[derive(Clone, Debug, Default)]
pub struct SourceBuilder {
    source: RecordSource,
}

impl SourceBuilder {
    /// Empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record.
    pub fn with(mut self, record: RecordBuilder) -> Self {
        self.source.set(record.build());
        self
    }

    /// Add a tombstone for `id`.
    pub fn deleted(mut self, id: &str) -> Self {
        self.source.delete(DataId::new(id));
        self
    }

    /// Finish the source.
    pub fn build(self) -> RecordSource {
        self.source
    }
}

/// A `User` record with a `name`.
pub fn user(id: &str, name: &str) -> RecordBuilder {
    RecordBuilder::new(id, "User").scalar("name", Value::String(name.to_owned()))
}
