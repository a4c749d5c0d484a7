//! # Altair Virtual Memory Manager (VMM)
//!
//! The virtual-memory subsystem of the Altair teaching kernel. It provides:
//!
//! - A process-wide physical frame allocator shared by every address space.
//! - Per-process address spaces built from program images, each with a
//!   bounded resident set.
//! - Lazily created, per-space swap files holding the content of pages
//!   that are not in memory.
//! - Pluggable replacement policies, and a page-fault handler that drives
//!   demand paging and eviction through them.
//!
//! The execution model is cooperative and single-core: a page fault is
//! resolved to completion before the faulting instruction is retried, so
//! the only serialization the subsystem needs is around the two
//! process-wide pools (physical frames and space identifiers).

mod address_space;
mod backing_store;
mod config;
mod fault;
mod frame_allocator;
mod replacement;
mod resident_set;
mod space_id;

pub use address_space::{AddressSpace, LoadError};
pub use backing_store::BackingStore;
pub use config::VmConfig;
pub use fault::{FatalFault, PageFaultHandler};
pub use frame_allocator::FrameAllocator;
pub use replacement::{Clock, EnhancedClock, Fifo, Lifo, Random, ReplacementPolicy};
pub use resident_set::ResidentSet;
pub use space_id::{MAX_SPACES, SpaceId, SpaceIdPool};
