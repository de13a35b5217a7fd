// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Availability check of an operation against the store.
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use serde_json::Value;
use tracing::instrument;

use super::Store;
use crate::ident::DataId;
use crate::mutator::RecordSourceMutator;
use crate::record::{FieldValue, Record};
use crate::selector::{resolve_arguments, Field, OperationDescriptor, Selection, Variables};
use crate::source::{RecordSource, RecordSourceView, RecordStatus};

/// Whether an operation can be fulfilled from the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationAvailability {
    /// Every selected field is present and fresh.
    Available {
        /// Clock reading of the last write carrying the operation.
        fetch_time: Option<u64>,
    },
    /// Data is present but invalidated or expired.
    Stale,
    /// At least one selected field is absent.
    Missing,
}

/// Synthesizes a scalar for a field absent from the store.
pub type ScalarHandlerFn = dyn Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Value>;
/// Synthesizes a link (`Some(None)` for null) for a field absent from the store.
pub type LinkedHandlerFn =
    dyn Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Option<DataId>>;
/// Synthesizes plural links for a field absent from the store.
pub type PluralLinkedHandlerFn =
    dyn Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Vec<Option<DataId>>>;

/// Fills in fields that [`Store::check`] finds missing.
///
/// Handlers receive the field, the record it is missing on, the field's
/// resolved arguments and a read view. The first handler returning `Some`
/// wins; its value is written into the target source returned by `check`.
#[derive(Clone)]
pub enum MissingFieldHandler {
    /// Scalar fields.
    Scalar(Rc<ScalarHandlerFn>),
    /// Singular linked fields.
    Linked(Rc<LinkedHandlerFn>),
    /// Plural linked fields.
    PluralLinked(Rc<PluralLinkedHandlerFn>),
}

impl MissingFieldHandler {
    /// Scalar handler from a closure.
    pub fn scalar(
        f: impl Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Value> + 'static,
    ) -> Self {
        Self::Scalar(Rc::new(f))
    }

    /// Linked handler from a closure.
    pub fn linked(
        f: impl Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Option<DataId>>
            + 'static,
    ) -> Self {
        Self::Linked(Rc::new(f))
    }

    /// Plural linked handler from a closure.
    pub fn plural_linked(
        f: impl Fn(&Field, &Record, &Variables, &dyn RecordSourceView) -> Option<Vec<Option<DataId>>>
            + 'static,
    ) -> Self {
        Self::PluralLinked(Rc::new(f))
    }
}

impl fmt::Debug for MissingFieldHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scalar(_) => f.write_str("MissingFieldHandler::Scalar"),
            Self::Linked(_) => f.write_str("MissingFieldHandler::Linked"),
            Self::PluralLinked(_) => f.write_str("MissingFieldHandler::PluralLinked"),
        }
    }
}

impl Store {
    /// Checks whether `operation` can be served from the store.
    ///
    /// Returns the availability together with the records synthesized by
    /// `handlers`; callers publish a non-empty target to keep them.
    #[instrument(level = "debug", skip_all, fields(operation = %operation.request.identifier))]
    pub fn check(
        &self,
        operation: &OperationDescriptor,
        handlers: &[MissingFieldHandler],
    ) -> (OperationAvailability, RecordSource) {
        let root = self.roots.get(&operation.request.identifier);
        let written_at = root.and_then(|r| r.epoch);
        let fetch_time = root.and_then(|r| r.fetch_time);

        if let Some(global) = self.global_invalidation_epoch {
            if written_at.is_none_or(|epoch| epoch <= global) {
                return (OperationAvailability::Stale, RecordSource::new());
            }
        }

        let view = self.source();
        let mut target = RecordSource::new();
        let (is_missing, invalidated_at) = {
            let mut checker = DataChecker {
                mutator: RecordSourceMutator::new(&view, &mut target),
                handlers,
                variables: &operation.root.variables,
                is_missing: false,
                invalidated_at: None,
            };
            checker.check_record(&operation.root.data_id, &operation.root.node.selections);
            (checker.is_missing, checker.invalidated_at)
        };

        let availability = if invalidated_at
            .is_some_and(|at| written_at.is_none_or(|epoch| at > epoch))
        {
            OperationAvailability::Stale
        } else if is_missing {
            OperationAvailability::Missing
        } else if self.is_expired(fetch_time) {
            OperationAvailability::Stale
        } else {
            OperationAvailability::Available { fetch_time }
        };
        tracing::debug!(?availability, synthesized = target.size(), "checked");
        (availability, target)
    }

    fn is_expired(&self, fetch_time: Option<u64>) -> bool {
        match (fetch_time, self.config.query_cache_expiration_ms) {
            (Some(fetched), Some(ttl)) => fetched <= self.now().saturating_sub(ttl),
            _ => false,
        }
    }
}

struct DataChecker<'c, 'a> {
    mutator: RecordSourceMutator<'a>,
    handlers: &'c [MissingFieldHandler],
    variables: &'c Variables,
    is_missing: bool,
    invalidated_at: Option<u64>,
}

impl DataChecker<'_, '_> {
    fn check_record(&mut self, id: &DataId, selections: &[Selection]) {
        match self.mutator.status(id) {
            RecordStatus::Unknown => self.is_missing = true,
            RecordStatus::Nonexistent => {}
            RecordStatus::Existent => {
                if let Some(record) = self.mutator.get(id).cloned() {
                    if let Some(at) = record.invalidated_at() {
                        self.invalidated_at = Some(self.invalidated_at.map_or(at, |m| m.max(at)));
                    }
                    self.traverse(&record, selections);
                }
            }
        }
    }

    fn traverse(&mut self, record: &Arc<Record>, selections: &[Selection]) {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => self.check_scalar(record, field),
                Selection::Linked(linked) => {
                    let key = linked.field.storage_key(self.variables);
                    self.check_link(record, &linked.field, &key, linked.plural, &linked.selections);
                    for handle in &linked.handles {
                        let handle_key = handle.handle_key(&linked.field, self.variables);
                        self.check_link(
                            record,
                            &linked.field,
                            &handle_key,
                            linked.plural,
                            &linked.selections,
                        );
                    }
                }
                Selection::Resolver(resolver) => {
                    if let Some(fragment) = resolver.fragment.as_ref() {
                        self.traverse(record, &fragment.selections);
                    }
                }
                Selection::InlineFragment {
                    type_condition,
                    selections,
                } => {
                    if record.typename() == type_condition {
                        self.traverse(record, selections);
                    }
                }
                Selection::Condition {
                    condition,
                    passing_value,
                    selections,
                } => {
                    let value = self.variables.get(condition).and_then(Value::as_bool);
                    if value == Some(*passing_value) {
                        self.traverse(record, selections);
                    }
                }
            }
        }
    }

    fn check_scalar(&mut self, record: &Record, field: &Field) {
        if matches!(field.name.as_str(), "__typename" | "__id") {
            return;
        }
        let key = field.storage_key(self.variables);
        if record.get(&key).is_some() {
            return;
        }
        let args = resolve_arguments(&field.args, self.variables);
        let synthesized = self.handlers.iter().find_map(|h| match h {
            MissingFieldHandler::Scalar(f) => f(field, record, &args, &self.mutator.view()),
            _ => None,
        });
        match synthesized {
            Some(value) => self.write(record.id(), &key, FieldValue::Scalar(value)),
            None => self.is_missing = true,
        }
    }

    fn check_link(
        &mut self,
        record: &Record,
        field: &Field,
        key: &str,
        plural: bool,
        selections: &[Selection],
    ) {
        let stored = match self.mutator.get_field(record.id(), key) {
            Some(value) => Some(value.clone()),
            None => self.synthesize_link(record, field, key, plural),
        };
        match stored {
            None => self.is_missing = true,
            Some(FieldValue::Link(id)) => self.check_record(&id, selections),
            Some(FieldValue::Links(ids)) => {
                for id in ids.iter().flatten() {
                    self.check_record(id, selections);
                }
            }
            Some(FieldValue::Scalar(_)) => {}
        }
    }

    /// Runs the link handlers and writes the first answer into the target.
    fn synthesize_link(
        &mut self,
        record: &Record,
        field: &Field,
        key: &str,
        plural: bool,
    ) -> Option<FieldValue> {
        let args = resolve_arguments(&field.args, self.variables);
        let value = {
            let view = self.mutator.view();
            self.handlers.iter().find_map(|h| match (h, plural) {
                (MissingFieldHandler::Linked(f), false) => f(field, record, &args, &view)
                    .map(|link| link.map_or(FieldValue::NULL, FieldValue::Link)),
                (MissingFieldHandler::PluralLinked(f), true) => {
                    f(field, record, &args, &view).map(FieldValue::Links)
                }
                _ => None,
            })
        }?;
        self.write(record.id(), key, value.clone());
        Some(value)
    }

    fn write(&mut self, id: &DataId, key: &str, value: FieldValue) {
        if let Err(err) = self.mutator.set_field(id, key, value) {
            tracing::warn!(%err, "could not store synthesized field");
            self.is_missing = true;
        }
    }
}
