//! # IDs
//!
//! Scene objects are referenced by `ObjectId`, unique within this execution of
//! the program. Commands hold ids rather than references so that an undo
//! script stays valid while unrelated objects come and go around it.
//! Order of ids is not guaranteed.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a scene object, stable for the life of the process.
/// Ids are never reused, even after the object is deleted.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ObjectId(NonZeroU64);

impl ObjectId {
    /// Allocate a fresh id.
    #[must_use]
    pub fn next() -> Self {
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        // 2^64 - 1 allocations before this fires. Not a reachable state.
        Self(NonZeroU64::new(id).expect("object id counter overflowed"))
    }
    /// Get the raw numeric value of this id.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::next()
    }
}
