// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Object-graph editing surface handed to updater functions.
//!
//! Updaters never touch a source directly: they receive a
//! [`RecordSourceProxy`] (or the selector-scoped
//! [`RecordSourceSelectorProxy`]) and edit records through
//! [`RecordProxy`] handles. Besides the writes themselves, the proxy records
//! which ids were created and which were marked for invalidation, and
//! whether the whole store was invalidated; the publish queue reads those
//! back after the updater returns.
use std::ops::{Deref, DerefMut};

use rustc_hash::FxHashSet;
use serde_json::Value;

use crate::error::StoreError;
use crate::handlers::{HandleFieldPayload, HandlerRegistry};
use crate::ident::{generate_client_id, DataId, ROOT_ID, ROOT_TYPE};
use crate::mutator::RecordSourceMutator;
use crate::record::FieldValue;
use crate::selector::{Selection, Selector};
use crate::source::{RecordSource, RecordSourceView, RecordState, RecordStatus};

/// Transactional editing view over a mutator.
pub struct RecordSourceProxy<'a> {
    mutator: RecordSourceMutator<'a>,
    handlers: Option<&'a HandlerRegistry>,
    created: FxHashSet<DataId>,
    invalidated: FxHashSet<DataId>,
    store_invalidated: bool,
}

impl std::fmt::Debug for RecordSourceProxy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSourceProxy")
            .field("created", &self.created.len())
            .field("invalidated", &self.invalidated.len())
            .field("store_invalidated", &self.store_invalidated)
            .finish_non_exhaustive()
    }
}

impl<'a> RecordSourceProxy<'a> {
    /// Wraps `mutator`; `handlers` serves field payloads in [`Self::publish_source`].
    pub fn new(mutator: RecordSourceMutator<'a>, handlers: Option<&'a HandlerRegistry>) -> Self {
        Self {
            mutator,
            handlers,
            created: FxHashSet::default(),
            invalidated: FxHashSet::default(),
            store_invalidated: false,
        }
    }

    /// Underlying mutator.
    pub fn mutator(&self) -> &RecordSourceMutator<'a> {
        &self.mutator
    }

    /// Existence of `id` through this transaction.
    pub fn status(&self, id: &DataId) -> RecordStatus {
        self.mutator.status(id)
    }

    /// Creates a record and returns a handle to it.
    ///
    /// Creating an id that already exists is an invariant violation.
    pub fn create(&mut self, id: DataId, typename: &str) -> Result<RecordProxy<'_, 'a>, StoreError> {
        if self.mutator.status(&id) == RecordStatus::Existent {
            return Err(StoreError::RecordAlreadyExists(id));
        }
        self.mutator.create(id.clone(), typename);
        self.created.insert(id.clone());
        Ok(RecordProxy { proxy: self, id })
    }

    /// Deletes `id`. The root record cannot be deleted.
    pub fn delete(&mut self, id: &DataId) -> Result<(), StoreError> {
        if id.as_str() == ROOT_ID {
            return Err(StoreError::CannotDeleteRoot);
        }
        self.created.remove(id);
        self.mutator.delete(id.clone());
        Ok(())
    }

    /// Handle to `id` if it exists.
    pub fn get(&mut self, id: &DataId) -> Option<RecordProxy<'_, 'a>> {
        if self.mutator.status(id) == RecordStatus::Existent {
            Some(RecordProxy {
                proxy: self,
                id: id.clone(),
            })
        } else {
            None
        }
    }

    /// Handle to the root record, creating it when absent.
    pub fn get_root(&mut self) -> RecordProxy<'_, 'a> {
        let root = DataId::new(ROOT_ID);
        if self.mutator.status(&root) != RecordStatus::Existent {
            self.mutator.create(root.clone(), ROOT_TYPE);
        }
        RecordProxy {
            proxy: self,
            id: root,
        }
    }

    /// Marks the whole store invalidated when this transaction is published.
    pub fn invalidate_store(&mut self) {
        self.store_invalidated = true;
    }

    /// Ids created during this transaction.
    pub fn created_ids(&self) -> &FxHashSet<DataId> {
        &self.created
    }

    /// Ids marked for invalidation during this transaction.
    pub fn ids_marked_for_invalidation(&self) -> &FxHashSet<DataId> {
        &self.invalidated
    }

    /// Takes the invalidation set, leaving it empty.
    pub fn take_ids_marked_for_invalidation(&mut self) -> FxHashSet<DataId> {
        std::mem::take(&mut self.invalidated)
    }

    /// Whether [`Self::invalidate_store`] was called.
    pub fn is_store_marked_for_invalidation(&self) -> bool {
        self.store_invalidated
    }

    /// Applies a normalized payload through this transaction, then runs the
    /// handlers for its handle fields.
    ///
    /// Existent records are merged field-by-field into any record already
    /// visible; tombstones delete.
    pub fn publish_source(
        &mut self,
        source: &RecordSource,
        field_payloads: &[HandleFieldPayload],
    ) -> Result<(), StoreError> {
        for id in source.sorted_ids() {
            match source.entry(&id) {
                Some(RecordState::Existent(record)) => {
                    if self.mutator.status(&id) != RecordStatus::Existent {
                        self.create(id.clone(), record.typename())?;
                    }
                    self.mutator.copy_fields_from_record(record, &id)?;
                }
                Some(RecordState::Nonexistent) => self.delete(&id)?,
                None => {}
            }
        }
        self.run_handlers(field_payloads)
    }

    /// Runs the registered handler of every payload in order.
    pub fn run_handlers(&mut self, field_payloads: &[HandleFieldPayload]) -> Result<(), StoreError> {
        for payload in field_payloads {
            let handler = self
                .handlers
                .and_then(|registry| registry.get(&payload.handle))
                .ok_or_else(|| StoreError::MissingHandler(payload.handle.clone()))?;
            handler.update(self, payload)?;
        }
        Ok(())
    }

    fn mark_invalidated(&mut self, id: DataId) {
        self.invalidated.insert(id);
    }
}

/// Handle to one record inside a [`RecordSourceProxy`] transaction.
///
/// Keys are storage keys; fields with arguments are addressed with
/// [`crate::format_storage_key`].
pub struct RecordProxy<'p, 'a> {
    proxy: &'p mut RecordSourceProxy<'a>,
    id: DataId,
}

impl std::fmt::Debug for RecordProxy<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordProxy").field("id", &self.id).finish()
    }
}

impl<'p, 'a> RecordProxy<'p, 'a> {
    /// Id of the record.
    pub fn id(&self) -> &DataId {
        &self.id
    }

    /// Type name of the record.
    pub fn typename(&self) -> Option<&str> {
        self.proxy.mutator.get_type(&self.id)
    }

    /// Scalar stored under `key`.
    pub fn get_value(&self, key: &str) -> Option<&Value> {
        self.proxy.mutator.get_value(&self.id, key)
    }

    /// Sets a scalar under `key`.
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<&mut Self, StoreError> {
        self.proxy.mutator.set_value(&self.id, key, value)?;
        Ok(self)
    }

    /// Linked id stored under `key`, if any.
    pub fn get_linked_record_id(&self, key: &str) -> Option<DataId> {
        self.proxy.mutator.get_linked_record_id(&self.id, key).flatten()
    }

    /// Handle to the record linked under `key`.
    pub fn get_linked_record(&mut self, key: &str) -> Option<RecordProxy<'_, 'a>> {
        let target = self.get_linked_record_id(key)?;
        self.proxy.get(&target)
    }

    /// Consumes the handle, returning one to the record linked under `key`.
    pub fn into_linked_record(self, key: &str) -> Option<RecordProxy<'p, 'a>> {
        let target = self.get_linked_record_id(key)?;
        if self.proxy.status(&target) == RecordStatus::Existent {
            Some(RecordProxy {
                proxy: self.proxy,
                id: target,
            })
        } else {
            None
        }
    }

    /// Plural linked ids stored under `key`.
    pub fn get_linked_record_ids(&self, key: &str) -> Option<Vec<Option<DataId>>> {
        self.proxy
            .mutator
            .get_linked_record_ids(&self.id, key)
            .flatten()
    }

    /// Links `target` under `key`; the target must exist.
    pub fn set_linked_record(&mut self, key: &str, target: &DataId) -> Result<&mut Self, StoreError> {
        if self.proxy.status(target) != RecordStatus::Existent {
            return Err(StoreError::RecordNotFound(target.clone()));
        }
        self.proxy
            .mutator
            .set_linked_record_id(&self.id, key, target.clone())?;
        Ok(self)
    }

    /// Links `targets` under `key`; every non-null target must exist.
    pub fn set_linked_records(
        &mut self,
        key: &str,
        targets: Vec<Option<DataId>>,
    ) -> Result<&mut Self, StoreError> {
        if let Some(missing) = targets
            .iter()
            .flatten()
            .find(|t| self.proxy.status(t) != RecordStatus::Existent)
        {
            return Err(StoreError::RecordNotFound(missing.clone()));
        }
        self.proxy
            .mutator
            .set_linked_record_ids(&self.id, key, targets)?;
        Ok(self)
    }

    /// Writes a raw field value under `key`.
    pub fn set_field(&mut self, key: &str, value: FieldValue) -> Result<&mut Self, StoreError> {
        self.proxy.mutator.set_field(&self.id, key, value)?;
        Ok(self)
    }

    /// Writes an explicit null under `key`.
    pub fn set_null(&mut self, key: &str) -> Result<&mut Self, StoreError> {
        self.proxy
            .mutator
            .set_field(&self.id, key, FieldValue::NULL)?;
        Ok(self)
    }

    /// Returns the record linked under `key`, creating a client record of
    /// `typename` (and the link) when none exists.
    pub fn get_or_create_linked_record(
        &mut self,
        key: &str,
        typename: &str,
    ) -> Result<RecordProxy<'_, 'a>, StoreError> {
        let target = match self.get_linked_record_id(key) {
            Some(id) if self.proxy.status(&id) == RecordStatus::Existent => id,
            _ => {
                let id = generate_client_id(&self.id, key, None);
                if self.proxy.status(&id) != RecordStatus::Existent {
                    self.proxy.create(id.clone(), typename)?;
                }
                self.proxy
                    .mutator
                    .set_linked_record_id(&self.id, key, id.clone())?;
                id
            }
        };
        Ok(RecordProxy {
            proxy: &mut *self.proxy,
            id: target,
        })
    }

    /// Copies every field of `source` onto this record.
    pub fn copy_fields_from(&mut self, source: &DataId) -> Result<&mut Self, StoreError> {
        self.proxy.mutator.copy_fields(source, &self.id)?;
        Ok(self)
    }

    /// Marks this record invalidated when the transaction is published.
    pub fn invalidate_record(&mut self) {
        let id = self.id.clone();
        self.proxy.mark_invalidated(id);
    }
}

/// [`RecordSourceProxy`] scoped to an operation's selector.
///
/// Adds access to the operation's root fields by schema name.
pub struct RecordSourceSelectorProxy<'p, 'a> {
    proxy: &'p mut RecordSourceProxy<'a>,
    selector: &'p Selector,
}

impl<'p, 'a> RecordSourceSelectorProxy<'p, 'a> {
    /// Scopes `proxy` to `selector`.
    pub fn new(proxy: &'p mut RecordSourceProxy<'a>, selector: &'p Selector) -> Self {
        Self { proxy, selector }
    }

    /// Handle to the record linked by root field `name`.
    pub fn root_field(&mut self, name: &str) -> Option<RecordProxy<'_, 'a>> {
        let key = self.root_field_key(name, false)?;
        let root = self.selector.data_id.clone();
        let target = self.proxy.mutator.get_linked_record_id(&root, &key)??;
        self.proxy.get(&target)
    }

    /// Ids linked by plural root field `name`.
    pub fn plural_root_field(&mut self, name: &str) -> Option<Vec<Option<DataId>>> {
        let key = self.root_field_key(name, true)?;
        let root = self.selector.data_id.clone();
        self.proxy.mutator.get_linked_record_ids(&root, &key)?
    }

    fn root_field_key(&self, name: &str, plural: bool) -> Option<String> {
        self.selector
            .node
            .selections
            .iter()
            .find_map(|selection| match selection {
                Selection::Linked(linked) if linked.field.name == name && linked.plural == plural => {
                    Some(linked.field.storage_key(&self.selector.variables))
                }
                _ => None,
            })
    }
}

impl<'a> Deref for RecordSourceSelectorProxy<'_, 'a> {
    type Target = RecordSourceProxy<'a>;

    fn deref(&self) -> &Self::Target {
        &*self.proxy
    }
}

impl DerefMut for RecordSourceSelectorProxy<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut *self.proxy
    }
}
