// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Selection trees, selectors and operation descriptors.
//!
//! Selection trees are produced by the (external) query compiler. The same
//! tree drives reads ([`crate::read`]), availability checks, and garbage
//! collection marking: readers use response keys (aliases) and resolver
//! fields; checks and marking use storage keys and handle keys.
use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::ident::{format_storage_key, DataId, RequestIdentifier, ROOT_ID};
use crate::resolver::ResolverId;

/// Variable bindings for one operation, kept in key order.
pub type Variables = BTreeMap<String, Value>;

/// Action taken when a `@required` field is null or missing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequiredAction {
    /// Bubble the null silently.
    None,
    /// Bubble the null and log the violation.
    Log,
    /// Bubble the null and surface the violation as an error.
    Throw,
}

/// Value of a field argument.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgumentValue {
    /// Literal value.
    Literal(Value),
    /// Reference to an operation variable; unbound variables resolve to null.
    Variable(String),
}

/// Named field argument.
#[derive(Clone, Debug, PartialEq)]
pub struct Argument {
    /// Argument name.
    pub name: String,
    /// Argument value.
    pub value: ArgumentValue,
}

impl Argument {
    /// Literal argument.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Literal(value),
        }
    }

    /// Variable argument.
    pub fn variable(name: impl Into<String>, variable: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: ArgumentValue::Variable(variable.into()),
        }
    }
}

/// Resolves `args` against `variables`.
#[must_use]
pub fn resolve_arguments(args: &[Argument], variables: &Variables) -> Variables {
    args.iter()
        .map(|arg| {
            let value = match &arg.value {
                ArgumentValue::Literal(v) => v.clone(),
                ArgumentValue::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            };
            (arg.name.clone(), value)
        })
        .collect()
}

/// Common shape of every field selection.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    /// Schema field name.
    pub name: String,
    /// Response key override.
    pub alias: Option<String>,
    /// Field arguments.
    pub args: Vec<Argument>,
    /// Storage key override, used when the compiler redirects reads to a
    /// handle key (e.g. `__friends_connection`).
    pub storage_key: Option<String>,
    /// `@required` action, if declared.
    pub required: Option<RequiredAction>,
}

impl Field {
    /// Field without alias, arguments or directives.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: None,
            args: Vec::new(),
            storage_key: None,
            required: None,
        }
    }

    /// Sets the response alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: Argument) -> Self {
        self.args.push(arg);
        self
    }

    /// Forces the storage key.
    #[must_use]
    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = Some(key.into());
        self
    }

    /// Marks the field `@required(action)`.
    #[must_use]
    pub fn with_required(mut self, action: RequiredAction) -> Self {
        self.required = Some(action);
        self
    }

    /// Key under which the value appears in read data.
    #[must_use]
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Key under which the value is stored on the record.
    #[must_use]
    pub fn storage_key(&self, variables: &Variables) -> String {
        match &self.storage_key {
            Some(key) => key.clone(),
            None => format_storage_key(&self.name, &resolve_arguments(&self.args, variables)),
        }
    }
}

/// Client-side processing attached to a linked field (e.g. connections).
#[derive(Clone, Debug, PartialEq)]
pub struct FieldHandle {
    /// Handler name looked up in the [`crate::HandlerRegistry`].
    pub handle: String,
    /// User-supplied handle key; empty selects the field name.
    pub key: String,
    /// Argument names that partition the handle's storage.
    pub filters: Vec<String>,
}

impl FieldHandle {
    /// Storage key under which the handler writes its output for `field`.
    ///
    /// `__<key>_<handle>` (or `__<field>_<handle>` without a key), qualified
    /// by the filter arguments.
    #[must_use]
    pub fn handle_key(&self, field: &Field, variables: &Variables) -> String {
        let base = if self.key.is_empty() {
            format!("__{}_{}", field.name, self.handle)
        } else {
            format!("__{}_{}", self.key, self.handle)
        };
        let args = resolve_arguments(&field.args, variables);
        let filtered: Variables = args
            .into_iter()
            .filter(|(name, _)| self.filters.iter().any(|f| f == name))
            .collect();
        format_storage_key(&base, &filtered)
    }
}

/// Selection of a field that points at other records.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedField {
    /// Field shape.
    pub field: Field,
    /// Whether the field holds a list of links.
    pub plural: bool,
    /// Child selections read on the linked record(s).
    pub selections: Vec<Selection>,
    /// Handles whose output is stored next to the field.
    pub handles: Vec<FieldHandle>,
}

/// Selection of a computed field.
#[derive(Clone, Debug, PartialEq)]
pub struct ResolverField {
    /// Field shape; arguments are passed to the resolver.
    pub field: Field,
    /// Fragment read on the owning record and handed to the resolver.
    pub fragment: Option<Arc<Fragment>>,
    /// Resolver implementation to invoke.
    pub resolver: ResolverId,
}

/// One node of a selection tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    /// Scalar field (including scalar lists).
    Scalar(Field),
    /// Singular or plural linked field.
    Linked(LinkedField),
    /// Computed field.
    Resolver(ResolverField),
    /// Selections applied only to records of `type_condition`.
    InlineFragment {
        /// Required record type name.
        type_condition: String,
        /// Nested selections.
        selections: Vec<Selection>,
    },
    /// Selections applied when a boolean variable equals `passing_value`.
    Condition {
        /// Variable holding the condition.
        condition: String,
        /// Value that enables the selections.
        passing_value: bool,
        /// Nested selections.
        selections: Vec<Selection>,
    },
}

impl Selection {
    /// Plain scalar field.
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::Scalar(Field::new(name))
    }

    /// Singular linked field.
    pub fn linked(field: Field, selections: Vec<Self>) -> Self {
        Self::Linked(LinkedField {
            field,
            plural: false,
            selections,
            handles: Vec::new(),
        })
    }

    /// Plural linked field.
    pub fn plural(field: Field, selections: Vec<Self>) -> Self {
        Self::Linked(LinkedField {
            field,
            plural: true,
            selections,
            handles: Vec::new(),
        })
    }

    /// Computed field backed by `resolver`.
    pub fn resolver(
        field: Field,
        fragment: Option<Arc<Fragment>>,
        resolver: impl Into<ResolverId>,
    ) -> Self {
        Self::Resolver(ResolverField {
            field,
            fragment,
            resolver: resolver.into(),
        })
    }
}

/// Named selection set read on one record.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment {
    /// Fragment or query name, used in diagnostics.
    pub name: String,
    /// Top-level selections.
    pub selections: Vec<Selection>,
    /// Resolver errors inside this fragment are reported as hard failures.
    pub throw_on_field_error: bool,
}

impl Fragment {
    /// Fragment with the given selections.
    pub fn new(name: impl Into<String>, selections: Vec<Selection>) -> Self {
        Self {
            name: name.into(),
            selections,
            throw_on_field_error: false,
        }
    }

    /// Marks the fragment `@throwOnFieldError`.
    #[must_use]
    pub fn throwing_on_field_error(mut self) -> Self {
        self.throw_on_field_error = true;
        self
    }
}

/// A fragment rooted at one record, with the variables to read it under.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    /// Record the fragment is read on.
    pub data_id: DataId,
    /// Selection tree.
    pub node: Arc<Fragment>,
    /// Variable bindings.
    pub variables: Variables,
    /// Request that produced the data, reported by notify.
    pub owner: Option<RequestIdentifier>,
}

impl Selector {
    /// Selector without an owner.
    pub fn new(data_id: DataId, node: Arc<Fragment>, variables: Variables) -> Self {
        Self {
            data_id,
            node,
            variables,
            owner: None,
        }
    }
}

/// Identity and variables of one request.
#[derive(Clone, Debug, PartialEq)]
pub struct RequestDescriptor {
    /// Stable request identifier.
    pub identifier: RequestIdentifier,
    /// Variables the request was issued with.
    pub variables: Variables,
}

/// A request plus the selectors used to read, check and retain its data.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationDescriptor {
    /// Request identity.
    pub request: RequestDescriptor,
    /// Selector traversed by check and garbage collection.
    pub root: Selector,
    /// Selector read by lookups and selector-scoped updaters.
    pub fragment: Selector,
}

impl OperationDescriptor {
    /// Descriptor for `query` rooted at the root record.
    pub fn new(name: &str, query: Arc<Fragment>, variables: Variables) -> Self {
        Self::with_data_id(name, query, variables, DataId::new(ROOT_ID))
    }

    /// Descriptor for `query` rooted at `data_id` (e.g. refetch queries).
    pub fn with_data_id(
        name: &str,
        query: Arc<Fragment>,
        variables: Variables,
        data_id: DataId,
    ) -> Self {
        let identifier = RequestIdentifier::for_request(name, &variables);
        let root = Selector::new(data_id, query, variables.clone());
        let mut fragment = root.clone();
        fragment.owner = Some(identifier.clone());
        Self {
            request: RequestDescriptor {
                identifier,
                variables,
            },
            root,
            fragment,
        }
    }
}
