//! Translation entries and the flat page table describing a user address
//! space.
//!
//! The entry format belongs to the machine: the CPU simulator reads these
//! entries on every access, and the kernel's virtual-memory layer fills
//! them in. A user address space is described by one flat table with an
//! entry per virtual page, indices fixed for the life of the space.

use core::fmt;

use crate::{FrameNumber, PageNumber};

/// A single entry in an address space's page table.
///
/// `valid` means the entry may currently be used for translation; a valid
/// entry always maps a frame, and no two valid entries in any address space
/// may map the same frame. `referenced` is set by the machine on access,
/// and `dirty` on writes; replacement scans clear `referenced`, and a flush
/// to the backing store clears `dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TranslationEntry {
    virtual_page: PageNumber,
    physical_page: Option<FrameNumber>,
    valid: bool,
    referenced: bool,
    dirty: bool,
    read_only: bool,
}

impl TranslationEntry {
    /// Creates a new, unmapped entry for the given virtual page.
    pub const fn new(virtual_page: PageNumber) -> Self {
        Self {
            virtual_page,
            physical_page: None,
            valid: false,
            referenced: false,
            dirty: false,
            read_only: false,
        }
    }

    /// Returns the virtual page this entry translates.
    pub const fn virtual_page(self) -> PageNumber {
        self.virtual_page
    }

    /// Returns the mapped frame, or None if the entry is not mapped.
    pub const fn frame(self) -> Option<FrameNumber> {
        self.physical_page
    }

    /// Returns whether this entry may currently be used for translation.
    pub const fn is_valid(self) -> bool {
        self.valid
    }

    /// Returns whether the page has been accessed since the bit was last
    /// cleared.
    pub const fn referenced(self) -> bool {
        self.referenced
    }

    /// Returns whether the page has been written since it was last flushed.
    pub const fn dirty(self) -> bool {
        self.dirty
    }

    /// Returns whether writes to the page are disallowed.
    pub const fn is_read_only(self) -> bool {
        self.read_only
    }

    /// Maps this entry onto a frame and marks it valid.
    ///
    /// The referenced and dirty bits are left as they are; mapping is not
    /// an access.
    pub fn map(&mut self, frame: FrameNumber) {
        self.physical_page = Some(frame);
        self.valid = true;
    }

    /// Invalidates this entry, returning the frame it mapped.
    ///
    /// Returns None if the entry was not valid.
    pub fn unmap(&mut self) -> Option<FrameNumber> {
        if !self.valid {
            return None;
        }
        self.valid = false;
        self.physical_page.take()
    }

    /// Sets or clears the referenced bit.
    pub fn set_referenced(&mut self, referenced: bool) {
        self.referenced = referenced;
    }

    /// Sets or clears the dirty bit.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
    }

    /// Sets or clears write protection.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }
}

/// A flat page table with one entry per virtual page.
pub struct PageTable {
    entries: Vec<TranslationEntry>,
}

impl PageTable {
    /// Creates a table of `num_pages` unmapped entries.
    pub fn new(num_pages: usize) -> Self {
        Self {
            entries: (0..num_pages)
                .map(|page| TranslationEntry::new(PageNumber::new(page)))
                .collect(),
        }
    }

    /// Returns the number of entries in this page table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns whether this table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the entry for the given virtual page.
    ///
    /// # Panics
    /// Panics if the page is beyond the table.
    pub fn entry(&self, page: PageNumber) -> &TranslationEntry {
        assert!(page.as_usize() < self.entries.len(), "page table index out of bounds");
        &self.entries[page.as_usize()]
    }

    /// Returns a mutable reference to the entry for the given virtual page.
    ///
    /// # Panics
    /// Panics if the page is beyond the table.
    pub fn entry_mut(&mut self, page: PageNumber) -> &mut TranslationEntry {
        assert!(page.as_usize() < self.entries.len(), "page table index out of bounds");
        &mut self.entries[page.as_usize()]
    }

    /// Returns the number of valid entries.
    pub fn valid_count(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_valid()).count()
    }

    /// Iterates over all entries in virtual-page order.
    pub fn iter(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.entries.iter()
    }

    /// Iterates mutably over all entries in virtual-page order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TranslationEntry> {
        self.entries.iter_mut()
    }
}

impl fmt::Display for PageTable {
    /// Formats the table as the classic page-table dump, one row per page.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vpage  frame  valid  ref  dirty")?;
        for entry in &self.entries {
            let frame = match entry.frame() {
                Some(frame) => frame.as_usize() as i64,
                None => -1,
            };
            writeln!(
                f,
                "{:>5}  {:>5}  {:>5}  {:>3}  {:>5}",
                entry.virtual_page(),
                frame,
                entry.is_valid() as u8,
                entry.referenced() as u8,
                entry.dirty() as u8,
            )?;
        }
        Ok(())
    }
}
