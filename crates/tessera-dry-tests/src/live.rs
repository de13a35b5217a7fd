// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Externally driven live state.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::Value;
use tessera_core::resolver::{LiveNotifier, LiveState, LiveValue};

#[derive(Debug)]
struct Inner {
    value: LiveValue,
    subscribers: Vec<(u64, LiveNotifier)>,
    next_token: u64,
}

/// A value the test sets from outside; every change notifies subscribers.
///
/// Clones share the value. Hand [`Self::state`] to a live resolver.
#[derive(Clone, Debug)]
pub struct PollingLiveSource {
    inner: Rc<RefCell<Inner>>,
}

impl PollingLiveSource {
    /// Source holding `value`.
    pub fn new(value: Value) -> Self {
        Self::with_live_value(LiveValue::Value(value))
    }

    /// Source whose value is not available yet.
    pub fn pending() -> Self {
        Self::with_live_value(LiveValue::Pending)
    }

    fn with_live_value(value: LiveValue) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                value,
                subscribers: Vec::new(),
                next_token: 0,
            })),
        }
    }

    /// Sets a new value and notifies every subscriber.
    pub fn set(&self, value: Value) {
        self.set_live_value(LiveValue::Value(value));
    }

    /// Sets a new live value (pending or error included) and notifies.
    pub fn set_live_value(&self, value: LiveValue) {
        let notifiers: Vec<LiveNotifier> = {
            let mut inner = self.inner.borrow_mut();
            inner.value = value;
            inner.subscribers.iter().map(|(_, n)| n.clone()).collect()
        };
        for notifier in notifiers {
            notifier.notify();
        }
    }

    /// Boxed state for a live resolver.
    pub fn state(&self) -> Box<dyn LiveState> {
        Box::new(self.clone())
    }

    /// Currently subscribed notifiers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subscribers.len()
    }
}

impl LiveState for PollingLiveSource {
    fn read(&self) -> LiveValue {
        self.inner.borrow().value.clone()
    }

    fn subscribe(&self, notifier: LiveNotifier) -> Box<dyn FnOnce()> {
        let token = {
            let mut inner = self.inner.borrow_mut();
            let token = inner.next_token;
            inner.next_token += 1;
            inner.subscribers.push((token, notifier));
            token
        };
        let inner = Rc::clone(&self.inner);
        Box::new(move || inner.borrow_mut().subscribers.retain(|(t, _)| *t != token))
    }
}
