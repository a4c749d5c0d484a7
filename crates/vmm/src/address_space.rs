//! Address-space construction, teardown, and machine state installation.
//!
//! An address space is built from a program image when an exec-style
//! request loads it, lives for the owning process's lifetime, and releases
//! everything it holds at destruction. Construction either produces a
//! fully consistent space or releases whatever it acquired and fails;
//! no partial space is ever left live.

use std::{fmt, io};

use log::{debug, trace};
use machine::{
    FileSystem, Machine, NEXT_PC_REG, NUM_TOTAL_REGS, PAGE_SIZE, PC_REG, PageNumber, PageTable,
    ProgramImage, STACK_REG,
};

use crate::{
    backing_store::BackingStore,
    config::VmConfig,
    frame_allocator::FrameAllocator,
    resident_set::ResidentSet,
    space_id::{SpaceId, SpaceIdPool},
};

/// Errors from address-space construction.
#[derive(Debug)]
pub enum LoadError {
    /// The space-identifier pool is exhausted.
    NoFreeSpaceId,
    /// Not enough free frames for the guaranteed-resident pages.
    InsufficientFrames,
    /// The storage layer failed while reading the image or preparing the
    /// backing store.
    Storage(io::Error),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NoFreeSpaceId => write!(f, "no free space identifier"),
            LoadError::InsufficientFrames => {
                write!(f, "not enough free frames for the resident set")
            }
            LoadError::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for LoadError {
    fn from(err: io::Error) -> Self {
        LoadError::Storage(err)
    }
}

/// One process's virtual address space.
///
/// Owns the page table, the resident-set bookkeeping, the space
/// identifier, and (for spaces larger than their resident budget) the
/// backing store holding non-resident page content.
pub struct AddressSpace {
    pub(crate) space_id: SpaceId,
    pub(crate) page_table: PageTable,
    pub(crate) residents: ResidentSet,
    pub(crate) resident_budget: usize,
    pub(crate) backing_store: Option<BackingStore>,
    pub(crate) image: ProgramImage,
    pub(crate) frames: FrameAllocator,
    ids: SpaceIdPool,
}

impl AddressSpace {
    /// Builds an address space from a program image.
    ///
    /// Sizes the space to the image's code, data, and stack; draws a space
    /// identifier; creates and seeds a backing store if the space exceeds
    /// its resident budget; and loads the guaranteed-resident pages into
    /// freshly allocated frames. Any failure releases everything acquired
    /// before returning.
    pub fn load(
        image: ProgramImage,
        machine: &mut Machine,
        frames: &FrameAllocator,
        ids: &SpaceIdPool,
        fs: &FileSystem,
        config: &VmConfig,
    ) -> Result<Self, LoadError> {
        let size = image.loaded_size() + config.user_stack_size;
        let num_pages = size.div_ceil(PAGE_SIZE);

        let Some(space_id) = ids.allocate() else {
            return Err(LoadError::NoFreeSpaceId);
        };

        match Self::build(image, machine, frames, ids, fs, config, space_id, num_pages) {
            Ok(space) => Ok(space),
            Err(err) => {
                ids.release(space_id);
                Err(err)
            }
        }
    }

    fn build(
        image: ProgramImage,
        machine: &mut Machine,
        frames: &FrameAllocator,
        ids: &SpaceIdPool,
        fs: &FileSystem,
        config: &VmConfig,
        space_id: SpaceId,
        num_pages: usize,
    ) -> Result<Self, LoadError> {
        let resident_budget = num_pages.min(config.min_resident_pages);
        debug!("space {space_id}: initializing, {num_pages} pages, resident budget {resident_budget}");

        // A space larger than its budget needs somewhere to keep the pages
        // that are not in memory. Seed the swap file with the full logical
        // image so later faults always have content to read.
        let backing_store = if num_pages > resident_budget {
            let store = BackingStore::create(fs, space_id, num_pages)?;
            let mut buf = [0u8; PAGE_SIZE];
            for page in (0..num_pages).map(PageNumber::new) {
                image.read_page(page, &mut buf)?;
                store.write_page(page, &buf)?;
            }
            Some(store)
        } else {
            None
        };

        let Some(allocated) = frames.find_many(resident_budget) else {
            return Err(LoadError::InsufficientFrames);
        };

        // Guaranteed-resident pages: leading code pages first, then
        // trailing pages covering the data next to the stack boundary.
        // Without a backing store the two ranges cover the whole space.
        let code_pages = image.code().size.div_ceil(PAGE_SIZE).min(resident_budget);
        let trailing = resident_budget - code_pages;
        let resident_pages = (0..code_pages)
            .chain(num_pages - trailing..num_pages)
            .map(PageNumber::new);

        let mut page_table = PageTable::new(num_pages);
        let mut residents = ResidentSet::new();

        let mut buf = [0u8; PAGE_SIZE];
        for (page, &frame) in resident_pages.zip(allocated.iter()) {
            if let Err(err) = image.read_page(page, &mut buf) {
                for &taken in &allocated {
                    frames.clear(taken);
                }
                return Err(LoadError::Storage(err));
            }
            machine.frame_mut(frame).copy_from_slice(&buf);
            page_table.entry_mut(page).map(frame);
            residents.push(page);
            trace!("space {space_id}: loaded page {page} into frame {frame}");
        }

        Ok(Self {
            space_id,
            page_table,
            residents,
            resident_budget,
            backing_store,
            image,
            frames: frames.clone(),
            ids: ids.clone(),
        })
    }

    /// Returns this space's identifier.
    pub fn space_id(&self) -> SpaceId {
        self.space_id
    }

    /// Returns the number of virtual pages in this space.
    pub fn num_pages(&self) -> usize {
        self.page_table.len()
    }

    /// Returns the maximum number of concurrently-resident pages.
    pub fn resident_budget(&self) -> usize {
        self.resident_budget
    }

    /// Returns the resident set, oldest page first.
    pub fn residents(&self) -> &ResidentSet {
        &self.residents
    }

    /// Returns a reference to the page table for this address space.
    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    /// Returns a mutable reference to the page table for this address
    /// space.
    pub fn page_table_mut(&mut self) -> &mut PageTable {
        &mut self.page_table
    }

    /// Returns the backing store, if this space has one.
    pub fn backing_store(&self) -> Option<&BackingStore> {
        self.backing_store.as_ref()
    }

    /// Sets the initial user-level register state for this space.
    ///
    /// The program counter starts at address zero, with the next-PC
    /// register trailing one instruction behind for the branch delay slot.
    pub fn init_registers(&self, machine: &mut Machine) {
        for register in 0..NUM_TOTAL_REGS {
            machine.write_register(register, 0);
        }
        machine.write_register(PC_REG, 0);
        machine.write_register(NEXT_PC_REG, 4);

        // Start the stack at the top of the space, less a little headroom
        // so the first push cannot run off the end.
        let stack_top = (self.num_pages() * PAGE_SIZE - 16) as u32;
        machine.write_register(STACK_REG, stack_top);
        debug!("space {}: stack register {stack_top}", self.space_id);
    }

    /// Saves machine state specific to this space on a context switch.
    ///
    /// Nothing needs saving: the register file travels with the thread and
    /// the page table lives here.
    pub fn save_state(&self, _machine: &mut Machine) {}

    /// Installs this space as the machine's active translation context.
    pub fn restore_state(&self, machine: &mut Machine) {
        machine.set_active_space(Some(self.space_id.as_usize()));
    }

    /// Logs the page-table dump for this space.
    pub fn dump(&self) {
        debug!(
            "space {}: {} pages, {} resident\n{}",
            self.space_id,
            self.num_pages(),
            self.residents.len(),
            self.page_table,
        );
    }
}

impl Drop for AddressSpace {
    fn drop(&mut self) {
        // Return every frame still held by a valid entry, then the
        // identifier. The backing store removes its own swap file.
        for entry in self.page_table.iter_mut() {
            if let Some(frame) = entry.unmap() {
                self.frames.clear(frame);
            }
        }
        self.ids.release(self.space_id);
        trace!("space {}: destroyed", self.space_id);
    }
}
