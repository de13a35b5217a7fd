// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recording subscribers and call counters.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde_json::Value;
use tessera_core::Snapshot;

/// Records the data of every snapshot delivered to a subscription.
///
/// Clones share the log, so keep one copy and hand [`Self::callback`] to
/// the store.
#[derive(Clone, Debug, Default)]
pub struct RecordingSubscriber {
    log: Rc<RefCell<Vec<Snapshot>>>,
}

impl RecordingSubscriber {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Callback appending to this log.
    pub fn callback(&self) -> impl FnMut(&Snapshot) + 'static {
        let log = Rc::clone(&self.log);
        move |snapshot| log.borrow_mut().push(snapshot.clone())
    }

    /// Number of deliveries.
    pub fn calls(&self) -> usize {
        self.log.borrow().len()
    }

    /// Data of every delivery, oldest first.
    pub fn data(&self) -> Vec<Value> {
        self.log.borrow().iter().map(|s| s.data.clone()).collect()
    }

    /// Most recent delivery.
    pub fn last(&self) -> Option<Snapshot> {
        self.log.borrow().last().cloned()
    }
}

/// Shared invocation counter, e.g. for resolver functions.
#[derive(Clone, Debug, Default)]
pub struct CallCounter {
    count: Rc<Cell<usize>>,
}

impl CallCounter {
    /// Counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call.
    pub fn tick(&self) {
        self.count.set(self.count.get() + 1);
    }

    /// Calls so far.
    pub fn count(&self) -> usize {
        self.count.get()
    }
}
