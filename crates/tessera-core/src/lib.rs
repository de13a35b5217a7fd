// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! tessera-core: normalized graph cache with optimistic rebasing.
//!
//! Records are stored flat, keyed by [`DataId`], and read back through
//! selection trees. All writes are serialized by the [`PublishQueue`]:
//! committed data lands in the canonical source, optimistic updates live in
//! an overlay that is rebuilt (rebased) whenever committed data arrives
//! underneath it. Derived fields are computed by registered resolvers and
//! memoized in the [`ResolverCache`]; subscriptions are re-read only when a
//! record they saw changes. [`Environment`] pairs one store with one queue.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self,
    clippy::missing_errors_doc,
    clippy::type_complexity
)]

mod config;
/// Connection pagination state and its reducer.
pub mod connection;
mod disposable;
mod environment;
mod error;
/// Handle field handlers (connections, edge insertion, record deletion).
pub mod handlers;
mod ident;
mod mutator;
mod proxy;
mod publish_queue;
mod reader;
mod record;
/// Resolver registry, memo cache, dependency graph and live state.
pub mod resolver;
mod selector;
mod source;
mod store;

pub use config::{ConfigError, StoreConfig, DEFAULT_RELEASE_BUFFER_SIZE};
pub use disposable::Disposable;
pub use environment::Environment;
pub use error::StoreError;
pub use handlers::{HandleFieldPayload, Handler, HandlerRegistry};
pub use ident::{
    format_storage_key, generate_client_id, generate_unique_client_id, DataId,
    RequestIdentifier, UpdateId, ROOT_ID, ROOT_TYPE,
};
pub use mutator::RecordSourceMutator;
pub use proxy::{RecordProxy, RecordSourceProxy, RecordSourceSelectorProxy};
pub use publish_queue::{
    OptimisticUpdate, PublishQueue, ResponsePayload, SelectorStoreUpdater,
    SelectorStoreUpdaterOnce, StoreUpdater, StoreUpdaterOnce,
};
pub use reader::{read, FieldError, FieldErrorReport, Snapshot};
pub use record::{FieldValue, Record, ID_KEY, INVALIDATED_AT_KEY, TYPENAME_KEY};
pub use resolver::{ResolverCache, ResolverContext, ResolverError, ResolverId, ResolverRegistry};
pub use selector::{
    resolve_arguments, Argument, ArgumentValue, Field, FieldHandle, Fragment, LinkedField,
    OperationDescriptor, RequestDescriptor, RequiredAction, ResolverField, Selection, Selector,
    Variables,
};
pub use source::{LayeredSource, RecordSource, RecordSourceView, RecordState, RecordStatus};
pub use store::{
    Clock, LinkedHandlerFn, MissingFieldHandler, OperationAvailability, PluralLinkedHandlerFn,
    ScalarHandlerFn, Store, StoreBuilder, SubscriptionCallback,
};
