// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and storage-key utilities.
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::Value;

/// Identity of the root record every operation reads from.
pub const ROOT_ID: &str = "client:root";
/// Type name given to the root record.
pub const ROOT_TYPE: &str = "__Root";

const CLIENT_ID_PREFIX: &str = "client:";

static LOCAL_CLIENT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Opaque identity of a normalized record.
///
/// Server-identified records carry whatever id the payload assigned; records
/// synthesized on the client (connection pages, resolver memos, optimistic
/// objects) use the `client:` namespace produced by [`generate_client_id`] and
/// [`generate_unique_client_id`]. Cloning is a reference-count bump.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataId(Arc<str>);

impl DataId {
    /// Wraps `id` as a record identity.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// The root record id (`client:root`).
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_ID)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` for ids synthesized on the client.
    #[must_use]
    pub fn is_client_id(&self) -> bool {
        self.0.starts_with(CLIENT_ID_PREFIX)
    }
}

impl fmt::Debug for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataId({})", self.0)
    }
}

impl fmt::Display for DataId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DataId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl AsRef<str> for DataId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stable identifier of a request (query text + variables) used to key
/// retained roots and to report which owners changed on notify.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct RequestIdentifier(Arc<str>);

impl RequestIdentifier {
    /// Wraps `id` as a request identifier.
    #[must_use]
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    /// Builds the identifier for `name` under `variables`.
    ///
    /// Variables are rendered in key order so equal variable maps always
    /// produce equal identifiers.
    #[must_use]
    pub fn for_request(name: &str, variables: &BTreeMap<String, Value>) -> Self {
        let rendered = Value::Object(
            variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        );
        Self::new(format!("{name}{rendered}"))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of an optimistic update.
///
/// Clones of one update share its id; the publish queue uses it to reject
/// double application.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct UpdateId(u64);

impl UpdateId {
    /// Allocates a fresh, process-unique update id.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "update#{}", self.0)
    }
}

/// Derives the id of a client record hanging off `parent` under
/// `storage_key`, optionally at position `index` of a plural field.
///
/// Derivation is deterministic: the same parent, key and index always map to
/// the same id.
#[must_use]
pub fn generate_client_id(parent: &DataId, storage_key: &str, index: Option<usize>) -> DataId {
    let mut id = String::with_capacity(
        CLIENT_ID_PREFIX.len() + parent.as_str().len() + storage_key.len() + 8,
    );
    if !parent.is_client_id() {
        id.push_str(CLIENT_ID_PREFIX);
    }
    id.push_str(parent.as_str());
    id.push(':');
    id.push_str(storage_key);
    if let Some(index) = index {
        id.push(':');
        id.push_str(&index.to_string());
    }
    DataId::from(id)
}

/// Produces a new client id that is unique within this process.
#[must_use]
pub fn generate_unique_client_id() -> DataId {
    let n = LOCAL_CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed);
    DataId::from(format!("{CLIENT_ID_PREFIX}local:{n}"))
}

/// Formats the storage key for field `name` called with `args`.
///
/// Null-valued arguments are omitted; remaining arguments are rendered as
/// `name:json` pairs in key order, e.g. `friends(first:10,orderBy:"name")`.
/// A field without non-null arguments is stored under its bare name.
#[must_use]
pub fn format_storage_key(name: &str, args: &BTreeMap<String, Value>) -> String {
    let rendered: Vec<String> = args
        .iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();
    if rendered.is_empty() {
        name.to_owned()
    } else {
        format!("{name}({})", rendered.join(","))
    }
}
