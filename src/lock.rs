//! Process-wide exclusivity marks for objects with a writer in flight.
//!
//! `mark` is an atomic test-and-set: at most one session holds the mark for a
//! given ID at a time, which is what guarantees a single concurrent writer
//! per physical file. The owning session must `unmark` on every exit path;
//! there is no reaper, so a mark leaked by a crashed process stays set for
//! the process lifetime.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct InUseTable {
    inner: Arc<Mutex<HashSet<String>>>,
}

impl InUseTable {
    pub fn new() -> Self {
        InUseTable::default()
    }

    /// Claim `id`. Returns false, with no side effect, if already claimed.
    pub fn mark(&self, id: &str) -> bool {
        self.inner.lock().insert(id.to_string())
    }

    /// Release `id`. Releasing an unclaimed ID is a no-op.
    pub fn unmark(&self, id: &str) {
        self.inner.lock().remove(id);
    }

    pub fn is_marked(&self, id: &str) -> bool {
        self.inner.lock().contains(id)
    }
}
