//! Tunables for address-space construction.

/// Default ceiling on concurrently-resident pages per address space.
///
/// A space that fits within this many pages is loaded whole and never
/// pages; a larger space gets this many resident pages and a backing
/// store for the rest.
pub const DEFAULT_MIN_RESIDENT_PAGES: usize = 4;

/// Default user stack size in bytes.
pub const DEFAULT_USER_STACK_SIZE: usize = 1024;

/// Construction-time parameters for address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// Resident budget granted to spaces too large to load whole.
    pub min_resident_pages: usize,
    /// Bytes of stack appended past the data segments.
    pub user_stack_size: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            min_resident_pages: DEFAULT_MIN_RESIDENT_PAGES,
            user_stack_size: DEFAULT_USER_STACK_SIZE,
        }
    }
}
