//! Per-address-space swap files.
//!
//! An address space whose page count exceeds its resident budget gets a
//! swap file sized to the full logical image. The file's name is derived
//! from the space identifier, so concurrently live spaces never collide.
//! All offsets are page-aligned; the file is a flat page-sized-chunk
//! mirror of the virtual image.

use std::io;

use log::{debug, trace};
use machine::{FileSystem, OpenFile, PAGE_SIZE, PageNumber};

use crate::space_id::SpaceId;

/// Returns the swap-file name for a space identifier.
fn swap_name(id: SpaceId) -> String {
    format!("SWAP_{id}")
}

/// The swap file backing one address space's non-resident pages.
pub struct BackingStore {
    fs: FileSystem,
    name: String,
    file: OpenFile,
    num_pages: usize,
}

impl BackingStore {
    /// Creates the swap file for the given space, sized to `num_pages`.
    pub fn create(fs: &FileSystem, id: SpaceId, num_pages: usize) -> io::Result<Self> {
        let name = swap_name(id);
        let file = fs.create(&name, num_pages * PAGE_SIZE)?;
        debug!("space {id}: created backing store {name} ({num_pages} pages)");
        Ok(Self {
            fs: fs.clone(),
            name,
            file,
            num_pages,
        })
    }

    /// Returns the swap file's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of pages the store covers.
    pub fn num_pages(&self) -> usize {
        self.num_pages
    }

    /// Reads one page of content into `buf`.
    ///
    /// # Panics
    /// Panics if the page is beyond the store or `buf` is not one page.
    pub fn read_page(&self, page: PageNumber, buf: &mut [u8]) -> io::Result<()> {
        assert!(page.as_usize() < self.num_pages, "page beyond backing store");
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be one page");

        let read = self.file.read_at(buf, page.start())?;
        if read != PAGE_SIZE {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        Ok(())
    }

    /// Writes one page of content from `buf`.
    ///
    /// # Panics
    /// Panics if the page is beyond the store or `buf` is not one page.
    pub fn write_page(&self, page: PageNumber, buf: &[u8]) -> io::Result<()> {
        assert!(page.as_usize() < self.num_pages, "page beyond backing store");
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be one page");
        self.file.write_at(buf, page.start())
    }
}

impl Drop for BackingStore {
    fn drop(&mut self) {
        // Best effort; the space is going away either way.
        if let Err(err) = self.fs.remove(&self.name) {
            trace!("failed to remove swap file {}: {err}", self.name);
        }
    }
}
