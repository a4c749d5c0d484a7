//! The simulated CPU state and physical memory.
//!
//! The register file and main memory live here, along with the byte-level
//! memory access path that consults the active page table and delivers
//! exceptions. A memory access that faults records the bad virtual address
//! and returns the exception to the caller; once the kernel resolves the
//! fault, the caller retries the access. The machine never advances the
//! program counter on the kernel's behalf.

use log::trace;

use crate::{FrameNumber, PAGE_SIZE, PageNumber, PageTable};

/// Total size of the register file.
pub const NUM_TOTAL_REGS: usize = 40;

/// Stack pointer register.
pub const STACK_REG: usize = 29;

/// Current program counter.
pub const PC_REG: usize = 34;

/// Next program counter, to account for the branch delay slot.
pub const NEXT_PC_REG: usize = 35;

/// Previous program counter, for debugging after an exception.
pub const PREV_PC_REG: usize = 36;

/// The virtual address that caused the most recent addressing exception.
pub const BAD_VADDR_REG: usize = 39;

/// Default number of physical frames in the simulated machine.
pub const DEFAULT_NUM_FRAMES: usize = 32;

/// Exceptions the simulated CPU can deliver to the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// A system call was requested by user code.
    Syscall,
    /// A translation hit an entry that is not valid.
    PageFault,
    /// A write was attempted through a read-only entry.
    ReadOnly,
    /// A valid entry named a frame outside physical memory.
    BusError,
    /// The address was beyond the active page table.
    AddressError,
    /// Integer overflow in user code.
    Overflow,
    /// An undecodable instruction.
    IllegalInstruction,
}

/// The simulated machine: registers plus flat physical memory.
///
/// Main memory is one byte buffer carved into `PAGE_SIZE` frames. The
/// kernel addresses it by frame; user code addresses it through a page
/// table via [`Machine::read_memory`] and [`Machine::write_memory`].
pub struct Machine {
    registers: [u32; NUM_TOTAL_REGS],
    main_memory: Vec<u8>,
    active_space: Option<usize>,
}

impl Machine {
    /// Creates a machine with the default amount of physical memory.
    pub fn new() -> Self {
        Self::with_frames(DEFAULT_NUM_FRAMES)
    }

    /// Creates a machine with the given number of physical frames.
    pub fn with_frames(num_frames: usize) -> Self {
        Self {
            registers: [0; NUM_TOTAL_REGS],
            main_memory: vec![0; num_frames * PAGE_SIZE],
            active_space: None,
        }
    }

    /// Returns the number of physical frames.
    pub fn num_frames(&self) -> usize {
        self.main_memory.len() / PAGE_SIZE
    }

    /// Reads a register.
    ///
    /// # Panics
    /// Panics if the register index is out of range.
    pub fn read_register(&self, register: usize) -> u32 {
        assert!(register < NUM_TOTAL_REGS, "register index out of range");
        self.registers[register]
    }

    /// Writes a register.
    ///
    /// # Panics
    /// Panics if the register index is out of range.
    pub fn write_register(&mut self, register: usize, value: u32) {
        assert!(register < NUM_TOTAL_REGS, "register index out of range");
        self.registers[register] = value;
    }

    /// Returns the contents of a physical frame.
    ///
    /// # Panics
    /// Panics if the frame is beyond physical memory.
    pub fn frame(&self, frame: FrameNumber) -> &[u8] {
        assert!(frame.as_usize() < self.num_frames(), "frame beyond physical memory");
        &self.main_memory[frame.start()..frame.end()]
    }

    /// Returns the contents of a physical frame, mutably.
    ///
    /// # Panics
    /// Panics if the frame is beyond physical memory.
    pub fn frame_mut(&mut self, frame: FrameNumber) -> &mut [u8] {
        assert!(frame.as_usize() < self.num_frames(), "frame beyond physical memory");
        let start = frame.start();
        let end = frame.end();
        &mut self.main_memory[start..end]
    }

    /// Installs the identity of the address space whose table the CPU
    /// consults, or clears it.
    pub fn set_active_space(&mut self, space: Option<usize>) {
        trace!("active space: {:?} -> {:?}", self.active_space, space);
        self.active_space = space;
    }

    /// Returns the identity of the active address space, if any.
    pub fn active_space(&self) -> Option<usize> {
        self.active_space
    }

    /// Reads one byte of user memory through the given page table.
    ///
    /// Sets the referenced bit on the translated entry. On failure, records
    /// the faulting address in `BAD_VADDR_REG` and returns the exception;
    /// the access is retried by the caller after the fault is resolved.
    pub fn read_memory(&mut self, table: &mut PageTable, address: usize) -> Result<u8, Exception> {
        let physical = self.translate(table, address, false)?;
        Ok(self.main_memory[physical])
    }

    /// Writes one byte of user memory through the given page table.
    ///
    /// Sets the referenced and dirty bits on the translated entry. Failure
    /// behavior matches [`Machine::read_memory`].
    pub fn write_memory(
        &mut self,
        table: &mut PageTable,
        address: usize,
        value: u8,
    ) -> Result<(), Exception> {
        let physical = self.translate(table, address, true)?;
        self.main_memory[physical] = value;
        Ok(())
    }

    /// Translates a virtual address through the given table, updating the
    /// entry's use bits.
    fn translate(
        &mut self,
        table: &mut PageTable,
        address: usize,
        writing: bool,
    ) -> Result<usize, Exception> {
        let page = PageNumber::containing(address);
        if page.as_usize() >= table.len() {
            self.registers[BAD_VADDR_REG] = address as u32;
            return Err(Exception::AddressError);
        }

        let entry = table.entry_mut(page);
        if !entry.is_valid() {
            self.registers[BAD_VADDR_REG] = address as u32;
            return Err(Exception::PageFault);
        }
        if writing && entry.is_read_only() {
            self.registers[BAD_VADDR_REG] = address as u32;
            return Err(Exception::ReadOnly);
        }

        let Some(frame) = entry.frame() else {
            // A valid entry always maps a frame; a miss here is machine
            // state corruption, not a recoverable fault.
            self.registers[BAD_VADDR_REG] = address as u32;
            return Err(Exception::BusError);
        };
        if frame.as_usize() >= self.num_frames() {
            self.registers[BAD_VADDR_REG] = address as u32;
            return Err(Exception::BusError);
        }

        entry.set_referenced(true);
        if writing {
            entry.set_dirty(true);
        }

        Ok(frame.start() + address % PAGE_SIZE)
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_with_mapping() -> (Machine, PageTable) {
        let machine = Machine::with_frames(4);
        let mut table = PageTable::new(2);
        table.entry_mut(PageNumber::new(0)).map(FrameNumber::new(3));
        (machine, table)
    }

    mod registers {
        use super::*;

        #[test]
        fn write_then_read() {
            let mut machine = Machine::new();
            machine.write_register(STACK_REG, 0xCAFE);
            assert_eq!(machine.read_register(STACK_REG), 0xCAFE);
        }

        #[test]
        #[should_panic(expected = "out of range")]
        fn index_out_of_range() {
            Machine::new().read_register(NUM_TOTAL_REGS);
        }
    }

    mod memory {
        use super::*;

        #[test]
        fn read_write_through_table() {
            let (mut machine, mut table) = machine_with_mapping();
            machine.write_memory(&mut table, 5, 0xAB).unwrap();
            assert_eq!(machine.read_memory(&mut table, 5).unwrap(), 0xAB);
            // The byte landed in frame 3, not frame 0.
            assert_eq!(machine.frame(FrameNumber::new(3))[5], 0xAB);
        }

        #[test]
        fn access_sets_use_bits() {
            let (mut machine, mut table) = machine_with_mapping();
            let page = PageNumber::new(0);

            machine.read_memory(&mut table, 0).unwrap();
            assert!(table.entry(page).referenced());
            assert!(!table.entry(page).dirty());

            machine.write_memory(&mut table, 0, 1).unwrap();
            assert!(table.entry(page).dirty());
        }

        #[test]
        fn invalid_entry_faults() {
            let (mut machine, mut table) = machine_with_mapping();
            let address = PAGE_SIZE + 7;
            let result = machine.read_memory(&mut table, address);
            assert_eq!(result, Err(Exception::PageFault));
            assert_eq!(machine.read_register(BAD_VADDR_REG) as usize, address);
        }

        #[test]
        fn out_of_range_address_errors() {
            let (mut machine, mut table) = machine_with_mapping();
            let address = 2 * PAGE_SIZE;
            let result = machine.read_memory(&mut table, address);
            assert_eq!(result, Err(Exception::AddressError));
            assert_eq!(machine.read_register(BAD_VADDR_REG) as usize, address);
        }

        #[test]
        fn read_only_write_faults() {
            let (mut machine, mut table) = machine_with_mapping();
            table.entry_mut(PageNumber::new(0)).set_read_only(true);
            let result = machine.write_memory(&mut table, 0, 1);
            assert_eq!(result, Err(Exception::ReadOnly));
            // Reads are still allowed.
            machine.read_memory(&mut table, 0).unwrap();
        }
    }
}
