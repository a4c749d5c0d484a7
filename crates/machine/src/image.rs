//! Program-image descriptors.
//!
//! An executable arrives as an open file plus pre-parsed segment
//! descriptors: code, initialized data, and the size of the uninitialized
//! data that follows them. Header parsing and endianness fixup happen
//! before this layer. The page-granular view assembled here is the single
//! source of image content for address-space construction and for seeding
//! a swap file.

use std::io;

use crate::{OpenFile, PAGE_SIZE, PageNumber};

/// One loadable segment of a program image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Location of the segment in the virtual address space.
    pub virtual_addr: usize,
    /// Size of the segment in bytes.
    pub size: usize,
    /// Offset of the segment's bytes within the executable file.
    pub file_offset: usize,
}

impl Segment {
    /// An absent segment.
    pub const fn empty() -> Self {
        Self {
            virtual_addr: 0,
            size: 0,
            file_offset: 0,
        }
    }

    /// Returns the virtual address just past this segment.
    pub const fn end(self) -> usize {
        self.virtual_addr + self.size
    }
}

/// A pre-parsed executable image.
#[derive(Debug, Clone)]
pub struct ProgramImage {
    executable: OpenFile,
    code: Segment,
    init_data: Segment,
    uninit_data_size: usize,
}

impl ProgramImage {
    /// Creates an image from an open executable and its segment layout.
    pub fn new(
        executable: OpenFile,
        code: Segment,
        init_data: Segment,
        uninit_data_size: usize,
    ) -> Self {
        Self {
            executable,
            code,
            init_data,
            uninit_data_size,
        }
    }

    /// Returns the code segment descriptor.
    pub fn code(&self) -> Segment {
        self.code
    }

    /// Returns the initialized-data segment descriptor.
    pub fn init_data(&self) -> Segment {
        self.init_data
    }

    /// Returns the size of the uninitialized data in bytes.
    pub fn uninit_data_size(&self) -> usize {
        self.uninit_data_size
    }

    /// Returns the total loadable size in bytes: code, initialized data,
    /// and uninitialized data.
    pub fn loaded_size(&self) -> usize {
        self.code.size + self.init_data.size + self.uninit_data_size
    }

    /// Fills `buf` with the logical content of one virtual page.
    ///
    /// Bytes covered by the code or initialized-data segments are read
    /// from the executable; everything else (uninitialized data, stack) is
    /// zero.
    ///
    /// # Panics
    /// Panics if `buf` is not exactly one page.
    pub fn read_page(&self, page: PageNumber, buf: &mut [u8]) -> io::Result<()> {
        assert_eq!(buf.len(), PAGE_SIZE, "page buffer must be one page");
        buf.fill(0);

        for segment in [self.code, self.init_data] {
            self.read_segment_overlap(segment, page, buf)?;
        }
        Ok(())
    }

    /// Copies the part of `segment` that overlaps `page` into `buf`.
    fn read_segment_overlap(
        &self,
        segment: Segment,
        page: PageNumber,
        buf: &mut [u8],
    ) -> io::Result<()> {
        let page_start = page.start();
        let page_end = page.end();

        let overlap_start = segment.virtual_addr.max(page_start);
        let overlap_end = segment.end().min(page_end);
        if overlap_start >= overlap_end {
            return Ok(());
        }

        let file_offset = segment.file_offset + (overlap_start - segment.virtual_addr);
        let dest = &mut buf[overlap_start - page_start..overlap_end - page_start];
        self.executable.read_at(dest, file_offset)?;
        Ok(())
    }
}
