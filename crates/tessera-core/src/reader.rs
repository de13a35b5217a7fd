// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Projection of a selector over a record source into a [`Snapshot`].
//!
//! A read reports, besides the data itself, whether anything was missing,
//! every record it observed (subscriptions are re-read when one of those
//! changes), pending live resolver fields, and field errors. Resolver fields
//! go through the [`ResolverCache`]; `@required` violations bubble null to
//! the nearest parent object.
use std::sync::Arc;

use rustc_hash::FxHashSet;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::ident::DataId;
use crate::record::{FieldValue, Record, ID_KEY, TYPENAME_KEY};
use crate::resolver::cache::FragmentRead;
use crate::resolver::{ResolverCache, ResolverError};
use crate::selector::{resolve_arguments, RequiredAction, ResolverField, Selection, Selector, Variables};
use crate::source::{RecordSourceView, RecordState};

/// Problem found on a single field during a read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldError {
    /// A `@required` field was null or missing.
    MissingRequired {
        /// Fragment that declared the field.
        owner: String,
        /// Dotted response path of the field.
        path: String,
        /// Declared action.
        action: RequiredAction,
    },
    /// A resolver (or its live state) failed.
    Resolver {
        /// Fragment that selected the field.
        owner: String,
        /// Dotted response path of the field.
        path: String,
        /// The resolver's error.
        error: ResolverError,
        /// The owning fragment treats field errors as hard failures.
        should_throw: bool,
    },
}

/// Field errors that must be surfaced to the caller.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{count} field error(s) require attention", count = .errors.len())]
pub struct FieldErrorReport {
    /// The offending errors, in read order.
    pub errors: Vec<FieldError>,
}

/// Result of reading a selector.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    /// Selected data; null when the root record is absent.
    pub data: Value,
    /// Some selected field or record was unknown.
    pub is_missing_data: bool,
    /// Memo ids of live resolver fields whose value is pending.
    pub missing_live_resolver_fields: Vec<DataId>,
    /// Every record (and resolver memo) observed by the read.
    pub seen_records: FxHashSet<DataId>,
    /// Field errors in read order.
    pub field_errors: Vec<FieldError>,
    /// The selector that was read.
    pub selector: Selector,
}

impl Snapshot {
    /// Most severe `@required` action among the snapshot's violations.
    #[must_use]
    pub fn required_action(&self) -> Option<RequiredAction> {
        self.field_errors
            .iter()
            .filter_map(|e| match e {
                FieldError::MissingRequired { action, .. } => Some(*action),
                FieldError::Resolver { .. } => None,
            })
            .max()
    }

    /// Surfaces field errors according to their severity.
    ///
    /// `Throw` violations and resolver errors inside a fragment marked
    /// `throw_on_field_error` are returned as an error; `Log` violations are
    /// logged; everything else is ignored.
    pub fn handle_field_errors(&self) -> Result<(), FieldErrorReport> {
        let action = self.required_action();
        if action == Some(RequiredAction::Log) {
            for error in &self.field_errors {
                if let FieldError::MissingRequired { owner, path, .. } = error {
                    tracing::warn!(%owner, %path, "required field is missing");
                }
            }
        }
        let throwing: Vec<FieldError> = self
            .field_errors
            .iter()
            .filter(|e| match e {
                FieldError::MissingRequired { action, .. } => {
                    *action == RequiredAction::Throw
                }
                FieldError::Resolver { should_throw, .. } => *should_throw,
            })
            .cloned()
            .collect();
        if throwing.is_empty() {
            Ok(())
        } else {
            Err(FieldErrorReport { errors: throwing })
        }
    }
}

/// Reads `selector` from `source`, evaluating resolver fields through `cache`.
pub fn read(source: &dyn RecordSourceView, cache: &mut ResolverCache, selector: &Selector) -> Snapshot {
    let mut reader = Reader::new(
        source,
        cache,
        &selector.variables,
        &selector.node.name,
        selector.node.throw_on_field_error,
    );
    let data = reader.read_record(&selector.data_id, &selector.node.selections);
    Snapshot {
        data,
        is_missing_data: reader.is_missing_data,
        missing_live_resolver_fields: reader.missing_live,
        seen_records: reader.seen,
        field_errors: reader.errors,
        selector: selector.clone(),
    }
}

/// Null bubbling out of a `@required` field.
struct RequiredBubble;

struct Reader<'r> {
    source: &'r dyn RecordSourceView,
    cache: &'r mut ResolverCache,
    variables: &'r Variables,
    owner: &'r str,
    throw_on_field_error: bool,
    seen: FxHashSet<DataId>,
    is_missing_data: bool,
    missing_live: Vec<DataId>,
    errors: Vec<FieldError>,
    path: Vec<String>,
}

impl<'r> Reader<'r> {
    fn new(
        source: &'r dyn RecordSourceView,
        cache: &'r mut ResolverCache,
        variables: &'r Variables,
        owner: &'r str,
        throw_on_field_error: bool,
    ) -> Self {
        Self {
            source,
            cache,
            variables,
            owner,
            throw_on_field_error,
            seen: FxHashSet::default(),
            is_missing_data: false,
            missing_live: Vec::new(),
            errors: Vec::new(),
            path: Vec::new(),
        }
    }

    fn read_record(&mut self, id: &DataId, selections: &[Selection]) -> Value {
        self.seen.insert(id.clone());
        let record = match self.source.entry(id) {
            None => {
                self.is_missing_data = true;
                return Value::Null;
            }
            Some(RecordState::Nonexistent) => return Value::Null,
            Some(RecordState::Existent(record)) => Arc::clone(record),
        };
        let mut data = Map::new();
        match self.traverse(&record, selections, &mut data) {
            Ok(()) => Value::Object(data),
            Err(RequiredBubble) => Value::Null,
        }
    }

    fn traverse(
        &mut self,
        record: &Record,
        selections: &[Selection],
        data: &mut Map<String, Value>,
    ) -> Result<(), RequiredBubble> {
        for selection in selections {
            match selection {
                Selection::Scalar(field) => {
                    let value = match field.name.as_str() {
                        TYPENAME_KEY => Value::String(record.typename().to_owned()),
                        ID_KEY => Value::String(record.id().as_str().to_owned()),
                        _ => match record.get(&field.storage_key(self.variables)) {
                            None => {
                                self.is_missing_data = true;
                                Value::Null
                            }
                            Some(FieldValue::Scalar(v)) => v.clone(),
                            Some(_) => Value::Null,
                        },
                    };
                    self.insert(data, field.response_key(), field.required, value)?;
                }
                Selection::Linked(linked) => {
                    let key = linked.field.storage_key(self.variables);
                    self.path.push(linked.field.response_key().to_owned());
                    let value = match (record.get(&key), linked.plural) {
                        (None, _) => {
                            self.is_missing_data = true;
                            Value::Null
                        }
                        (Some(FieldValue::Link(id)), false) => {
                            self.read_record(id, &linked.selections)
                        }
                        (Some(FieldValue::Links(ids)), true) => Value::Array(
                            ids.iter()
                                .map(|id| match id {
                                    Some(id) => self.read_record(id, &linked.selections),
                                    None => Value::Null,
                                })
                                .collect(),
                        ),
                        (Some(_), _) => Value::Null,
                    };
                    self.path.pop();
                    self.insert(data, linked.field.response_key(), linked.field.required, value)?;
                }
                Selection::Resolver(resolver) => {
                    let value = self.read_resolver(record, resolver);
                    self.insert(
                        data,
                        resolver.field.response_key(),
                        resolver.field.required,
                        value,
                    )?;
                }
                Selection::InlineFragment {
                    type_condition,
                    selections,
                } => {
                    if record.typename() == type_condition {
                        self.traverse(record, selections, data)?;
                    }
                }
                Selection::Condition {
                    condition,
                    passing_value,
                    selections,
                } => {
                    let value = self.variables.get(condition).and_then(Value::as_bool);
                    if value == Some(*passing_value) {
                        self.traverse(record, selections, data)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Stores `value` under `key`, enforcing `@required`.
    fn insert(
        &mut self,
        data: &mut Map<String, Value>,
        key: &str,
        required: Option<RequiredAction>,
        value: Value,
    ) -> Result<(), RequiredBubble> {
        if let (Some(action), true) = (required, value.is_null()) {
            self.errors.push(FieldError::MissingRequired {
                owner: self.owner.to_owned(),
                path: self.field_path(key),
                action,
            });
            return Err(RequiredBubble);
        }
        data.insert(key.to_owned(), value);
        Ok(())
    }

    fn field_path(&self, key: &str) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(key);
        parts.join(".")
    }

    fn read_resolver(&mut self, record: &Record, field: &ResolverField) -> Value {
        let owner = record.id();
        let key = field.field.storage_key(self.variables);
        let outcome = match self.cache.lookup(owner, &key) {
            Some(outcome) => outcome,
            None => {
                let fragment = self.read_fragment(record, field);
                let args = resolve_arguments(&field.field.args, self.variables);
                self.cache
                    .evaluate(owner, &key, &field.resolver, &args, fragment)
            }
        };

        self.seen.insert(outcome.memo_id.clone());
        self.seen.extend(outcome.seen.iter().cloned());
        if outcome.is_missing_data {
            self.is_missing_data = true;
        }
        if outcome.is_pending {
            self.missing_live.push(outcome.memo_id.clone());
        }
        if let Some(error) = outcome.error {
            self.errors.push(FieldError::Resolver {
                owner: self.owner.to_owned(),
                path: self.field_path(field.field.response_key()),
                error,
                should_throw: self.throw_on_field_error,
            });
        }
        outcome.value
    }

    fn read_fragment(&mut self, record: &Record, field: &ResolverField) -> FragmentRead {
        let Some(fragment) = field.fragment.as_ref() else {
            let mut seen = FxHashSet::default();
            seen.insert(record.id().clone());
            return FragmentRead {
                data: Value::Null,
                seen,
                is_missing_data: false,
            };
        };
        let source = self.source;
        let variables = self.variables;
        let mut nested = Reader::new(
            source,
            &mut *self.cache,
            variables,
            &fragment.name,
            fragment.throw_on_field_error,
        );
        let data = nested.read_record(record.id(), &fragment.selections);
        FragmentRead {
            data,
            seen: nested.seen,
            is_missing_data: nested.is_missing_data,
        }
    }
}
