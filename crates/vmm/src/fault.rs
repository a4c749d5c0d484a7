//! Page-fault resolution.
//!
//! A fault runs to completion before control returns to the faulting
//! instruction stream: the handler either leaves the faulting page mapped
//! or reports a fatal fault, after which the owning process is terminated.
//! The machine re-executes the faulting instruction itself; the handler
//! never advances the program counter.

use std::{fmt, io};

use log::{debug, trace, warn};
use machine::{FrameNumber, Machine, PageNumber, PageTable};

use crate::{address_space::AddressSpace, replacement::ReplacementPolicy, resident_set::ResidentSet};

/// Fault outcomes that are fatal to the faulting process.
///
/// The kernel terminates the process and keeps running; none of these are
/// recoverable by retrying the access.
#[derive(Debug)]
pub enum FatalFault {
    /// The faulting address lies beyond the address space.
    InvalidAddress { address: usize, num_pages: usize },
    /// A non-resident page has no backing content to read; the space's
    /// bookkeeping is corrupt.
    InconsistentSpace { page: PageNumber },
    /// The backing store failed.
    Storage(io::Error),
}

impl fmt::Display for FatalFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalFault::InvalidAddress { address, num_pages } => {
                write!(f, "address {address:#x} beyond the {num_pages}-page space")
            }
            FatalFault::InconsistentSpace { page } => {
                write!(f, "page {page} has no frame and no backing content")
            }
            FatalFault::Storage(err) => write!(f, "backing store error: {err}"),
        }
    }
}

impl std::error::Error for FatalFault {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FatalFault::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FatalFault {
    fn from(err: io::Error) -> Self {
        FatalFault::Storage(err)
    }
}

/// Resolves page faults against an address space.
///
/// Owns the replacement policy; the clock policies keep their scan cursor
/// here between faults.
pub struct PageFaultHandler {
    policy: Box<dyn ReplacementPolicy>,
}

impl PageFaultHandler {
    /// Creates a handler that evicts with the given policy.
    pub fn new(policy: Box<dyn ReplacementPolicy>) -> Self {
        Self { policy }
    }

    /// Returns the name of the replacement policy in use.
    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Resolves a fault at `address` in `space`.
    ///
    /// On success the faulting page is mapped, referenced, and clean, and
    /// the faulting instruction can be retried. A fault on an
    /// already-valid page is a no-op: nothing is re-read and nothing is
    /// evicted.
    pub fn resolve(
        &mut self,
        machine: &mut Machine,
        space: &mut AddressSpace,
        address: usize,
    ) -> Result<(), FatalFault> {
        let page = PageNumber::containing(address);
        if page.as_usize() >= space.num_pages() {
            warn!(
                "space {}: fault at {address:#x} beyond {} pages",
                space.space_id,
                space.num_pages()
            );
            return Err(FatalFault::InvalidAddress {
                address,
                num_pages: space.num_pages(),
            });
        }

        if space.page_table.entry(page).is_valid() {
            trace!("space {}: page {page} already resident", space.space_id);
            return Ok(());
        }

        // Without a backing store every page was made resident at
        // construction, so reaching a non-resident page means the
        // bookkeeping is corrupt.
        let Some(store) = space.backing_store.as_ref() else {
            warn!("space {}: non-resident page {page} with no backing store", space.space_id);
            return Err(FatalFault::InconsistentSpace { page });
        };

        // Page in without eviction while the space is under budget and a
        // free frame exists.
        if space.residents.len() < space.resident_budget {
            if let Some(frame) = space.frames.find() {
                if let Err(err) = store.read_page(page, machine.frame_mut(frame)) {
                    space.frames.clear(frame);
                    return Err(FatalFault::Storage(err));
                }
                install(&mut space.page_table, &mut space.residents, page, frame);
                debug!("space {}: paged in {page} to frame {frame}", space.space_id);
                debug_assert_eq!(space.residents.len(), space.page_table.valid_count());
                return Ok(());
            }
        }

        let victim = self.policy.choose_victim(&space.residents, &mut space.page_table);
        let victim_entry = *space.page_table.entry(victim);
        let Some(frame) = victim_entry.frame() else {
            warn!("space {}: resident page {victim} has no frame", space.space_id);
            return Err(FatalFault::InconsistentSpace { page: victim });
        };

        // Dirty content must reach the backing store before the frame is
        // reused for the incoming page.
        if victim_entry.dirty() {
            store.write_page(victim, machine.frame(frame))?;
            space.page_table.entry_mut(victim).set_dirty(false);
            trace!("space {}: flushed dirty victim {victim}", space.space_id);
        }

        store.read_page(page, machine.frame_mut(frame))?;

        space.page_table.entry_mut(victim).unmap();
        space.residents.remove(victim);
        install(&mut space.page_table, &mut space.residents, page, frame);
        debug!(
            "space {}: {} evicted {victim} for {page} (frame {frame})",
            space.space_id,
            self.policy.name()
        );
        debug_assert_eq!(space.residents.len(), space.page_table.valid_count());
        Ok(())
    }
}

/// Maps the faulting page onto its frame and records it resident.
fn install(table: &mut PageTable, residents: &mut ResidentSet, page: PageNumber, frame: FrameNumber) {
    let entry = table.entry_mut(page);
    entry.map(frame);
    entry.set_referenced(true);
    entry.set_dirty(false);
    residents.push(page);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::VmConfig, frame_allocator::FrameAllocator, replacement::Fifo, space_id::SpaceIdPool,
    };
    use machine::{FileSystem, PAGE_SIZE, ProgramImage, Segment};

    fn test_fs(tag: &str) -> FileSystem {
        let root = std::env::temp_dir().join(format!("altair-fault-{tag}-{}", std::process::id()));
        FileSystem::new(root).unwrap()
    }

    /// Loads a six-page code image (page `p` filled with byte `p + 1`)
    /// with a two-page resident budget and no stack.
    fn paged_space(fs: &FileSystem, machine: &mut Machine) -> (AddressSpace, FrameAllocator) {
        let frames = FrameAllocator::new(machine.num_frames());
        let ids = SpaceIdPool::new();

        let code_size = 6 * PAGE_SIZE;
        let file = fs.create("a.out", code_size).unwrap();
        for page in 0..6 {
            file.write_at(&[page as u8 + 1; PAGE_SIZE], page * PAGE_SIZE).unwrap();
        }
        let image = ProgramImage::new(
            file,
            Segment {
                virtual_addr: 0,
                size: code_size,
                file_offset: 0,
            },
            Segment::empty(),
            0,
        );

        let config = VmConfig {
            min_resident_pages: 2,
            user_stack_size: 0,
        };
        let space = AddressSpace::load(image, machine, &frames, &ids, fs, &config).unwrap();
        (space, frames)
    }

    fn resident(space: &AddressSpace) -> Vec<usize> {
        space.residents().iter().map(PageNumber::as_usize).collect()
    }

    #[test]
    fn address_beyond_space_is_fatal() {
        let fs = test_fs("invalid");
        let mut machine = Machine::new();
        let (mut space, _frames) = paged_space(&fs, &mut machine);
        let mut handler = PageFaultHandler::new(Box::new(Fifo));

        let address = space.num_pages() * PAGE_SIZE;
        let result = handler.resolve(&mut machine, &mut space, address);
        assert!(matches!(result, Err(FatalFault::InvalidAddress { .. })));
    }

    #[test]
    fn resolve_on_valid_page_is_a_no_op() {
        let fs = test_fs("idempotent");
        let mut machine = Machine::new();
        let (mut space, frames) = paged_space(&fs, &mut machine);
        let mut handler = PageFaultHandler::new(Box::new(Fifo));

        let before = resident(&space);
        let free_before = frames.count_free();
        handler.resolve(&mut machine, &mut space, 0).unwrap();

        assert_eq!(resident(&space), before);
        assert_eq!(frames.count_free(), free_before);
    }

    #[test]
    fn fifo_evicts_in_load_order() {
        let fs = test_fs("fifo");
        let mut machine = Machine::new();
        let (mut space, _frames) = paged_space(&fs, &mut machine);
        let mut handler = PageFaultHandler::new(Box::new(Fifo));

        assert_eq!(resident(&space), vec![0, 1]);

        handler.resolve(&mut machine, &mut space, 2 * PAGE_SIZE).unwrap();
        assert_eq!(resident(&space), vec![1, 2]);
        assert!(!space.page_table().entry(PageNumber::new(0)).is_valid());

        handler.resolve(&mut machine, &mut space, 3 * PAGE_SIZE).unwrap();
        assert_eq!(resident(&space), vec![2, 3]);
        assert!(!space.page_table().entry(PageNumber::new(1)).is_valid());
    }

    #[test]
    fn eviction_reuses_the_victim_frame() {
        let fs = test_fs("reuse");
        let mut machine = Machine::new();
        let (mut space, frames) = paged_space(&fs, &mut machine);
        let mut handler = PageFaultHandler::new(Box::new(Fifo));

        let victim_frame = space.page_table().entry(PageNumber::new(0)).frame().unwrap();
        let free_before = frames.count_free();

        handler.resolve(&mut machine, &mut space, 2 * PAGE_SIZE).unwrap();

        let new_frame = space.page_table().entry(PageNumber::new(2)).frame().unwrap();
        assert_eq!(new_frame, victim_frame);
        assert_eq!(frames.count_free(), free_before);
        // The frame now holds page 2's content.
        assert!(machine.frame(new_frame).iter().all(|&b| b == 3));
    }

    #[test]
    fn dirty_victim_is_flushed_before_reuse() {
        let fs = test_fs("dirty");
        let mut machine = Machine::new();
        let (mut space, _frames) = paged_space(&fs, &mut machine);
        let mut handler = PageFaultHandler::new(Box::new(Fifo));

        // Scribble on page 0 through the machine, marking it dirty.
        for offset in 0..PAGE_SIZE {
            machine.write_memory(space.page_table_mut(), offset, 0xEE).unwrap();
        }
        assert!(space.page_table().entry(PageNumber::new(0)).dirty());

        // Evict page 0, then fault it back in; the scribbled content must
        // have survived the round trip through the backing store.
        handler.resolve(&mut machine, &mut space, 2 * PAGE_SIZE).unwrap();
        handler.resolve(&mut machine, &mut space, 3 * PAGE_SIZE).unwrap();
        handler.resolve(&mut machine, &mut space, 0).unwrap();

        let entry = space.page_table().entry(PageNumber::new(0));
        assert!(!entry.dirty());
        let frame = entry.frame().unwrap();
        assert!(machine.frame(frame).iter().all(|&b| b == 0xEE));
    }

    #[test]
    fn page_in_under_budget_uses_a_free_frame() {
        let fs = test_fs("underbudget");
        let mut machine = Machine::new();
        let frames = FrameAllocator::new(machine.num_frames());
        let ids = SpaceIdPool::new();

        // Three-page budget, but only pages 0 and 2 load initially (one
        // code page plus the trailing page): page 1 faults in under
        // budget without any eviction.
        let file = fs.create("a.out", PAGE_SIZE).unwrap();
        file.write_at(&[7; PAGE_SIZE], 0).unwrap();
        let image = ProgramImage::new(
            file,
            Segment {
                virtual_addr: 0,
                size: PAGE_SIZE,
                file_offset: 0,
            },
            Segment::empty(),
            2 * PAGE_SIZE,
        );
        let config = VmConfig {
            min_resident_pages: 2,
            user_stack_size: PAGE_SIZE,
        };
        let mut space =
            AddressSpace::load(image, &mut machine, &frames, &ids, &fs, &config).unwrap();
        // Budget 2 of 4 pages: pages 0 and 3 resident.
        assert_eq!(resident(&space), vec![0, 3]);

        let mut handler = PageFaultHandler::new(Box::new(Fifo));
        let free_before = frames.count_free();
        // Raise the budget as a scheduler growing the working set would.
        space.resident_budget = 3;

        handler.resolve(&mut machine, &mut space, PAGE_SIZE).unwrap();
        assert_eq!(resident(&space), vec![0, 3, 1]);
        assert_eq!(frames.count_free(), free_before - 1);
    }
}
