// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Lazily processed disposal handles.
use std::cell::Cell;
use std::rc::Rc;

/// Handle returned by `subscribe`, `retain`, `hold_gc` and `apply_update`.
///
/// Disposing only flips a shared flag; the owner notices at its next
/// run, notify or GC pass. Disposing twice is a no-op.
#[derive(Clone, Debug, Default)]
pub struct Disposable {
    disposed: Rc<Cell<bool>>,
}

impl Disposable {
    /// Creates a live handle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the handle disposed.
    pub fn dispose(&self) {
        self.disposed.set(true);
    }

    /// Whether [`Self::dispose`] was called on this handle or a clone.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.get()
    }
}
