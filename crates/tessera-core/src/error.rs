// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Invariant violations reported by the store, queue and proxies.
use thiserror::Error;

use crate::ident::{DataId, UpdateId};

/// Errors emitted by the consistency engine.
///
/// Every variant signals a caller bug: the operation is rejected and the
/// engine state is left as it was before the call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The optimistic update is already pending or applied.
    #[error("optimistic update {0} is already pending or applied")]
    DuplicateOptimisticUpdate(UpdateId),
    /// A live-state batch was opened while another one was active.
    #[error("nested live state batches are not supported")]
    NestedBatch,
    /// `run()` was called with nothing to do (instrumented builds only).
    #[error("publish queue run would have been a no-op")]
    NoOpRun,
    /// A handle field named a handler that is not registered.
    #[error("no handler registered for handle `{0}`")]
    MissingHandler(String),
    /// A registry received two entries under one name.
    #[error("duplicate registry entry `{0}`")]
    DuplicateRegistration(String),
    /// `snapshot()` was called while a snapshot already existed.
    #[error("store snapshot already taken")]
    SnapshotAlreadyTaken,
    /// `restore()` was called without a snapshot.
    #[error("store restore requested without a snapshot")]
    RestoreWithoutSnapshot,
    /// `create` targeted an id that already exists.
    #[error("record {0} already exists")]
    RecordAlreadyExists(DataId),
    /// Updaters may not delete the root record.
    #[error("the root record cannot be deleted")]
    CannotDeleteRoot,
    /// An operation targeted a record that does not exist.
    #[error("record {0} does not exist")]
    RecordNotFound(DataId),
    /// An updater function reported a failure of its own.
    #[error("updater failed: {0}")]
    Updater(String),
}
