// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Computed fields: resolver registry, injected context and memoization.
//!
//! A resolver is a function from the data of its fragment (read on the
//! owning record), the field arguments and an injected [`ResolverContext`]
//! to a value. Live resolvers return a [`LiveState`] instead, whose value can
//! change without any record changing.
//!
//! Results are memoized by [`ResolverCache`] and invalidated precisely
//! through the [`DependencyGraph`].
use std::any::Any;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::error::StoreError;
use crate::selector::Variables;

pub mod cache;
pub mod dependency_graph;
pub mod live;

pub use cache::{ResolverCache, ResolverOutcome};
pub use dependency_graph::{DependencyGraph, Instruction};
pub use live::{FlushHook, LiveNotifier, LiveState, LiveUpdateQueue, LiveValue};

/// Name under which a resolver is registered.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResolverId(String);

impl ResolverId {
    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResolverId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ResolverId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Failure of a resolver invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolverError {
    /// The resolver itself reported an error.
    #[error("{0}")]
    Failed(String),
    /// A resolver field named a resolver that is not registered.
    #[error("no resolver registered as `{0}`")]
    Unknown(ResolverId),
}

impl ResolverError {
    /// Error carrying `message`.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Plain resolver signature.
pub type ResolverFn = dyn Fn(&Value, &Variables, &ResolverContext) -> Result<Value, ResolverError>;

/// Live resolver signature.
pub type LiveResolverFn =
    dyn Fn(&Value, &Variables, &ResolverContext) -> Result<Box<dyn LiveState>, ResolverError>;

/// A registered resolver implementation.
#[derive(Clone)]
pub enum Resolver {
    /// Computes a value once per invalidation.
    Plain(Rc<ResolverFn>),
    /// Produces a live state read on every live notification.
    Live(Rc<LiveResolverFn>),
}

impl Resolver {
    /// Wraps a plain resolver function.
    pub fn plain(
        f: impl Fn(&Value, &Variables, &ResolverContext) -> Result<Value, ResolverError> + 'static,
    ) -> Self {
        Self::Plain(Rc::new(f))
    }

    /// Wraps a live resolver function.
    pub fn live(
        f: impl Fn(&Value, &Variables, &ResolverContext) -> Result<Box<dyn LiveState>, ResolverError>
            + 'static,
    ) -> Self {
        Self::Live(Rc::new(f))
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Resolver::Plain"),
            Self::Live(_) => f.write_str("Resolver::Live"),
        }
    }
}

/// Id → resolver table, built once when the store is constructed.
#[derive(Clone, Debug, Default)]
pub struct ResolverRegistry {
    resolvers: FxHashMap<ResolverId, Resolver>,
}

impl ResolverRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resolver` under `id`.
    ///
    /// # Errors
    /// Returns [`StoreError::DuplicateRegistration`] when `id` is taken.
    pub fn register(
        &mut self,
        id: impl Into<ResolverId>,
        resolver: Resolver,
    ) -> Result<(), StoreError> {
        let id = id.into();
        if self.resolvers.contains_key(&id) {
            return Err(StoreError::DuplicateRegistration(id.0));
        }
        self.resolvers.insert(id, resolver);
        Ok(())
    }

    /// Builder form of [`Self::register`].
    pub fn with(mut self, id: impl Into<ResolverId>, resolver: Resolver) -> Result<Self, StoreError> {
        self.register(id, resolver)?;
        Ok(self)
    }

    /// Resolver registered under `id`.
    #[must_use]
    pub fn get(&self, id: &ResolverId) -> Option<&Resolver> {
        self.resolvers.get(id)
    }

    /// Number of registered resolvers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

/// Application value handed to every resolver invocation.
///
/// Replaces ambient globals: whatever a resolver needs from the outside
/// world is injected here when the store is built.
#[derive(Clone, Default)]
pub struct ResolverContext {
    value: Option<Rc<dyn Any>>,
}

impl ResolverContext {
    /// Context carrying `value`.
    pub fn new<T: Any>(value: T) -> Self {
        Self {
            value: Some(Rc::new(value)),
        }
    }

    /// The injected value, if it is a `T`.
    #[must_use]
    pub fn get<T: Any>(&self) -> Option<&T> {
        self.value.as_deref().and_then(|v| v.downcast_ref::<T>())
    }
}

impl fmt::Debug for ResolverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverContext")
            .field("has_value", &self.value.is_some())
            .finish()
    }
}
