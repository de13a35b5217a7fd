// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Live resolver state and the shared notification queue.
//!
//! External sources never touch the store. A live state's subscriber gets a
//! [`LiveNotifier`]; notifying pushes the memo id onto the store's
//! [`LiveUpdateQueue`] and, outside a batch, calls the queue's flush hook so
//! the owner of the store processes it on the spot. While a batch is open,
//! notifications accumulate and are drained together once the batch closes.
//! Without a hook, or while the store is busy, ids wait for the next notify
//! pass.
use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashSet;
use serde_json::Value;

use super::ResolverError;
use crate::error::StoreError;
use crate::ident::DataId;

/// Current value of a live state.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveValue {
    /// A value is available.
    Value(Value),
    /// The value is not available yet; readers see null.
    Pending,
    /// Reading the state failed.
    Error(ResolverError),
}

/// External state a live resolver exposes.
pub trait LiveState {
    /// Reads the current value.
    fn read(&self) -> LiveValue;

    /// Subscribes to changes; the returned closure unsubscribes.
    fn subscribe(&self, notifier: LiveNotifier) -> Box<dyn FnOnce()>;
}

/// Called after a notification arrives outside a batch.
pub type FlushHook = Rc<dyn Fn()>;

#[derive(Default)]
struct QueueState {
    pending: Vec<DataId>,
    queued: FxHashSet<DataId>,
    batching: bool,
    flush: Option<FlushHook>,
}

impl std::fmt::Debug for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueState")
            .field("pending", &self.pending)
            .field("batching", &self.batching)
            .field("flush", &self.flush.is_some())
            .finish_non_exhaustive()
    }
}

/// Shared queue of live memo ids whose state changed.
#[derive(Clone, Debug, Default)]
pub struct LiveUpdateQueue {
    state: Rc<RefCell<QueueState>>,
}

impl LiveUpdateQueue {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifier pushing `memo` onto this queue.
    #[must_use]
    pub fn notifier(&self, memo: DataId) -> LiveNotifier {
        LiveNotifier {
            queue: self.clone(),
            memo,
        }
    }

    /// Installs the hook run when a notification arrives outside a batch.
    pub fn set_flush_hook(&self, hook: impl Fn() + 'static) {
        self.state.borrow_mut().flush = Some(Rc::new(hook));
    }

    /// Opens a batch.
    ///
    /// # Errors
    /// Returns [`StoreError::NestedBatch`] if a batch is already open.
    pub fn begin_batch(&self) -> Result<(), StoreError> {
        let mut state = self.state.borrow_mut();
        if state.batching {
            return Err(StoreError::NestedBatch);
        }
        state.batching = true;
        Ok(())
    }

    /// Closes the open batch.
    pub fn end_batch(&self) {
        self.state.borrow_mut().batching = false;
    }

    /// Whether a batch is open.
    #[must_use]
    pub fn is_batching(&self) -> bool {
        self.state.borrow().batching
    }

    /// Whether notifications are waiting to be drained.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.state.borrow().pending.is_empty()
    }

    /// Takes every queued memo id in notification order.
    pub fn drain(&self) -> Vec<DataId> {
        let mut state = self.state.borrow_mut();
        state.queued.clear();
        std::mem::take(&mut state.pending)
    }

    fn push(&self, memo: &DataId) {
        let mut state = self.state.borrow_mut();
        if state.queued.insert(memo.clone()) {
            state.pending.push(memo.clone());
        }
    }

    fn flush(&self) {
        let hook = {
            let state = self.state.borrow();
            if state.batching {
                None
            } else {
                state.flush.clone()
            }
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// Handle a live state uses to report a change.
#[derive(Clone, Debug)]
pub struct LiveNotifier {
    queue: LiveUpdateQueue,
    memo: DataId,
}

impl LiveNotifier {
    /// Reports that the state changed.
    pub fn notify(&self) {
        tracing::trace!(memo = %self.memo, "live state changed");
        self.queue.push(&self.memo);
        self.queue.flush();
    }

    /// Memo id this notifier reports for.
    #[must_use]
    pub fn memo_id(&self) -> &DataId {
        &self.memo
    }
}
