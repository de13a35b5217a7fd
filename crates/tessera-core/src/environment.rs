// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Facade pairing one [`Store`] with one [`PublishQueue`].
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use serde_json::Value;

use crate::disposable::Disposable;
use crate::error::StoreError;
use crate::ident::RequestIdentifier;
use crate::proxy::{RecordSourceProxy, RecordSourceSelectorProxy};
use crate::publish_queue::{OptimisticUpdate, PublishQueue, ResponsePayload};
use crate::reader::Snapshot;
use crate::selector::{OperationDescriptor, Selector};
use crate::store::{MissingFieldHandler, OperationAvailability, Store};

/// Entry point for reads and writes.
///
/// Every write method queues its work and runs the queue immediately, so
/// subscribers are notified before the method returns. Disposal of a handle
/// returned by [`Self::apply_update`] or [`Self::retain`] is picked up by the
/// next write, [`Self::run`] or [`Self::gc`].
///
/// Live resolver notifications raised outside a batch are processed as soon
/// as they arrive. One raised while the store is already busy (from inside
/// a subscriber callback, say) is left queued for the store's next notify
/// pass.
#[derive(Debug)]
pub struct Environment {
    store: Rc<RefCell<Store>>,
    queue: PublishQueue,
}

impl Environment {
    /// Environment over `store` with an empty queue.
    #[must_use]
    pub fn new(store: Store) -> Self {
        let store = Rc::new(RefCell::new(store));
        let weak = Rc::downgrade(&store);
        store.borrow().live_queue().set_flush_hook(move || {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let Ok(mut store) = shared.try_borrow_mut() else {
                tracing::trace!("store busy, live update left queued");
                return;
            };
            store.process_live_updates();
        });
        Self {
            store,
            queue: PublishQueue::new(),
        }
    }

    /// The underlying store.
    ///
    /// Drop the guard before calling back into the environment.
    pub fn store(&self) -> Ref<'_, Store> {
        self.store.borrow()
    }

    /// Mutable access to the underlying store, bypassing the queue.
    pub fn store_mut(&mut self) -> RefMut<'_, Store> {
        self.store.borrow_mut()
    }

    /// The publish queue.
    #[must_use]
    pub fn queue(&self) -> &PublishQueue {
        &self.queue
    }

    /// Reads `selector` against the current state.
    pub fn lookup(&mut self, selector: &Selector) -> Snapshot {
        self.store.borrow_mut().lookup(selector)
    }

    /// Subscribes `callback` to changes of `snapshot`.
    pub fn subscribe(
        &mut self,
        snapshot: Snapshot,
        callback: impl FnMut(&Snapshot) + 'static,
    ) -> Disposable {
        self.store.borrow_mut().subscribe(snapshot, callback)
    }

    /// Retains `operation`'s data against garbage collection.
    pub fn retain(&mut self, operation: &OperationDescriptor) -> Disposable {
        self.store.borrow_mut().retain(operation)
    }

    /// Checks availability of `operation`, publishing whatever `handlers`
    /// synthesized.
    pub fn check(
        &mut self,
        operation: &OperationDescriptor,
        handlers: &[MissingFieldHandler],
    ) -> Result<OperationAvailability, StoreError> {
        let (availability, target) = self.store.borrow_mut().check(operation, handlers);
        if !target.is_empty() {
            self.queue.commit_source(target);
            self.queue.run(&mut self.store.borrow_mut(), None)?;
        }
        Ok(availability)
    }

    /// Commits a server response for `operation`.
    pub fn commit_payload(
        &mut self,
        operation: &OperationDescriptor,
        payload: ResponsePayload,
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue.commit_payload(operation.clone(), payload, None);
        self.queue.run(&mut self.store.borrow_mut(), Some(operation))
    }

    /// Commits a server response, then runs `updater` with the operation's
    /// data read from the response.
    pub fn commit_payload_with_updater(
        &mut self,
        operation: &OperationDescriptor,
        payload: ResponsePayload,
        updater: impl FnOnce(&mut RecordSourceSelectorProxy<'_, '_>, Option<&Value>) -> Result<(), StoreError>
            + 'static,
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue
            .commit_payload(operation.clone(), payload, Some(Box::new(updater)));
        self.queue.run(&mut self.store.borrow_mut(), Some(operation))
    }

    /// Commits a local store update.
    pub fn commit_update(
        &mut self,
        updater: impl FnOnce(&mut RecordSourceProxy<'_>) -> Result<(), StoreError> + 'static,
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue.commit_update(updater);
        self.queue.run(&mut self.store.borrow_mut(), None)
    }

    /// Applies an optimistic update. Dispose the handle (then write or
    /// [`Self::run`]) to roll it back.
    pub fn apply_update(&mut self, update: OptimisticUpdate) -> Result<Disposable, StoreError> {
        let handle = self.queue.apply_update(update)?;
        self.queue.run(&mut self.store.borrow_mut(), None)?;
        Ok(handle)
    }

    /// Rolls back an optimistic update.
    pub fn revert_update(
        &mut self,
        update: &OptimisticUpdate,
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue.revert_update(update);
        self.queue.run(&mut self.store.borrow_mut(), None)
    }

    /// Rolls back `old` and applies `new` in one run.
    pub fn replace_update(
        &mut self,
        old: &OptimisticUpdate,
        new: OptimisticUpdate,
    ) -> Result<Disposable, StoreError> {
        let handle = self.queue.replace_update(old, new)?;
        self.queue.run(&mut self.store.borrow_mut(), None)?;
        Ok(handle)
    }

    /// Rolls back every optimistic update.
    pub fn revert_all(&mut self) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue.revert_all();
        self.queue.run(&mut self.store.borrow_mut(), None)
    }

    /// Runs the queue, applying disposals made since the last write.
    pub fn run(&mut self) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.queue.run(&mut self.store.borrow_mut(), None)
    }

    /// Coalesces live resolver notifications raised by `f` into one notify.
    pub fn batch_live_state_updates(
        &mut self,
        f: impl FnOnce(),
    ) -> Result<Vec<RequestIdentifier>, StoreError> {
        self.store.borrow_mut().batch_live_state_updates(f)
    }

    /// Notifies for live resolver changes reported outside a batch.
    pub fn process_live_updates(&mut self) -> Vec<RequestIdentifier> {
        self.store.borrow_mut().process_live_updates()
    }

    /// Runs (or schedules) garbage collection.
    pub fn gc(&mut self) -> bool {
        self.store.borrow_mut().gc()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ident::DataId;
    use crate::record::Record;
    use crate::selector::{Field, Fragment, Selection, Variables};
    use crate::source::RecordSource;
    use serde_json::json;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Arc;

    fn me_query() -> OperationDescriptor {
        let selections = vec![Selection::linked(
            Field::new("me"),
            vec![Selection::scalar("name")],
        )];
        OperationDescriptor::new("MeQuery", Arc::new(Fragment::new("MeQuery", selections)), Variables::new())
    }

    fn payload(name: &str) -> ResponsePayload {
        let mut root = Record::new(DataId::root(), "__Root");
        root.set_linked_record_id("me", DataId::new("1"));
        let mut me = Record::new(DataId::new("1"), "User");
        me.set_value("name", json!(name));
        ResponsePayload::new(RecordSource::from_records([root, me]))
    }

    #[test]
    fn commit_payload_notifies_the_owning_request() {
        let mut env = Environment::new(Store::new(RecordSource::new()));
        let op = me_query();
        env.commit_payload(&op, payload("Alice")).unwrap();
        let snapshot = env.lookup(&op.fragment);
        assert_eq!(snapshot.data, json!({ "me": { "name": "Alice" } }));

        let calls = Rc::new(Cell::new(0));
        let seen = Rc::clone(&calls);
        env.subscribe(snapshot, move |_| seen.set(seen.get() + 1));
        let owners = env.commit_payload(&op, payload("Alicia")).unwrap();
        assert_eq!(owners, vec![op.request.identifier.clone()]);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn check_publishes_synthesized_fields() {
        let mut env = Environment::new(Store::new(RecordSource::from_records([Record::new(
            DataId::root(),
            "__Root",
        )])));
        let mut user = Record::new(DataId::new("1"), "User");
        user.set_value("name", json!("Ada"));
        env.store_mut().publish(&RecordSource::from_records([user]), &Default::default());
        let handler = MissingFieldHandler::linked(|field, _, _, _| {
            (field.name == "me").then(|| Some(DataId::new("1")))
        });
        let availability = env.check(&me_query(), &[handler]).unwrap();
        assert!(matches!(availability, OperationAvailability::Available { .. }));
        assert!(matches!(
            env.check(&me_query(), &[]).unwrap(),
            OperationAvailability::Available { .. }
        ));
    }
}
