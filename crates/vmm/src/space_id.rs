//! Space identifiers and the fixed pool they are drawn from.
//!
//! Every live address space holds a unique small-integer identifier; it
//! names the space in logs and derives its swap-file name. Identifiers are
//! released at destruction and may be reused.

use std::{fmt, sync::Arc};

use spin::Mutex;

/// Number of space identifiers in the pool, bounding concurrently live
/// address spaces.
pub const MAX_SPACES: usize = 128;

/// A small-integer handle uniquely naming a live address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SpaceId(usize);

impl SpaceId {
    /// Returns the raw identifier.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Shared handle to the space-identifier pool.
///
/// Cloning is cheap; all clones refer to the same pool. The pool holds one
/// bit per identifier, so `MAX_SPACES` is fixed at the word width.
#[derive(Clone)]
pub struct SpaceIdPool {
    used: Arc<Mutex<u128>>,
}

impl SpaceIdPool {
    /// Creates a pool with every identifier free.
    pub fn new() -> Self {
        Self {
            used: Arc::new(Mutex::new(0)),
        }
    }

    /// Allocates the lowest free identifier, or None if the pool is
    /// exhausted.
    pub fn allocate(&self) -> Option<SpaceId> {
        let mut used = self.used.lock();
        let free = !*used;
        if free == 0 {
            return None;
        }
        let id = free.trailing_zeros() as usize;
        *used |= 1u128 << id;
        Some(SpaceId(id))
    }

    /// Releases an identifier back to the pool.
    pub fn release(&self, id: SpaceId) {
        let mut used = self.used.lock();
        debug_assert!(*used & (1u128 << id.0) != 0, "releasing an unallocated space id");
        *used &= !(1u128 << id.0);
    }
}

impl Default for SpaceIdPool {
    fn default() -> Self {
        Self::new()
    }
}
