//! Replacement policies choosing eviction victims.
//!
//! A policy sees the resident set's insertion order and the referenced and
//! dirty bits of the page-table entries; the translation entry carries no
//! other per-page state, which bounds what any policy can use. Selection
//! never fails: the fault handler only invokes a policy when the resident
//! set is at capacity, so it is non-empty.

use machine::{PageNumber, PageTable};
use rand::Rng;

use crate::resident_set::ResidentSet;

/// Selects the resident page to evict when a fault finds no capacity.
pub trait ReplacementPolicy {
    /// Chooses a victim from `residents`.
    ///
    /// The resident set is non-empty by precondition. Clock-family
    /// policies clear referenced bits in `table` as a side effect of the
    /// scan.
    fn choose_victim(&mut self, residents: &ResidentSet, table: &mut PageTable) -> PageNumber;

    /// Returns the policy's name, for logging.
    fn name(&self) -> &'static str;
}

/// Where the clock cursor lands after evicting the page at `position`.
///
/// Eviction removes the victim from its slot and appends the incoming page
/// at the tail, so the slot that followed the victim shifts down into the
/// victim's position.
fn hand_after_eviction(position: usize, len: usize) -> usize {
    if position + 1 == len { 0 } else { position }
}

/// Uniform pick among resident pages.
#[derive(Debug, Default)]
pub struct Random;

impl ReplacementPolicy for Random {
    fn choose_victim(&mut self, residents: &ResidentSet, _table: &mut PageTable) -> PageNumber {
        let index = rand::thread_rng().gen_range(0..residents.len());
        residents.get(index)
    }

    fn name(&self) -> &'static str {
        "random"
    }
}

/// Evicts the oldest resident page.
#[derive(Debug, Default)]
pub struct Fifo;

impl ReplacementPolicy for Fifo {
    fn choose_victim(&mut self, residents: &ResidentSet, _table: &mut PageTable) -> PageNumber {
        residents.get(0)
    }

    fn name(&self) -> &'static str {
        "fifo"
    }
}

/// Evicts the most recently resident page.
#[derive(Debug, Default)]
pub struct Lifo;

impl ReplacementPolicy for Lifo {
    fn choose_victim(&mut self, residents: &ResidentSet, _table: &mut PageTable) -> PageNumber {
        residents.get(residents.len() - 1)
    }

    fn name(&self) -> &'static str {
        "lifo"
    }
}

/// Second-chance scan over the resident set in insertion order.
///
/// Referenced pages get their bit cleared and are passed over; the first
/// unreferenced page is the victim. The cursor persists across
/// invocations, landing on the slot that followed the victim.
#[derive(Debug, Default)]
pub struct Clock {
    hand: usize,
}

impl Clock {
    /// Creates a clock with the cursor at the oldest resident page.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplacementPolicy for Clock {
    fn choose_victim(&mut self, residents: &ResidentSet, table: &mut PageTable) -> PageNumber {
        let len = residents.len();
        let mut position = self.hand % len;
        // The first lap clears referenced bits, so a second lap always
        // finds a victim.
        loop {
            let page = residents.get(position);
            let entry = table.entry_mut(page);
            if entry.referenced() {
                entry.set_referenced(false);
                position = (position + 1) % len;
            } else {
                self.hand = hand_after_eviction(position, len);
                return page;
            }
        }
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}

/// Two-pass variant of [`Clock`] that prefers clean pages.
///
/// The first pass looks for a page that is neither referenced nor dirty
/// without disturbing any bits. The second clears referenced bits while
/// scanning and looks again; if every page is dirty, the plain clock rule
/// applies (and by then every referenced bit is clear).
#[derive(Debug, Default)]
pub struct EnhancedClock {
    hand: usize,
}

impl EnhancedClock {
    /// Creates a clock with the cursor at the oldest resident page.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReplacementPolicy for EnhancedClock {
    fn choose_victim(&mut self, residents: &ResidentSet, table: &mut PageTable) -> PageNumber {
        let len = residents.len();
        let start = self.hand % len;

        for offset in 0..len {
            let position = (start + offset) % len;
            let page = residents.get(position);
            let entry = table.entry(page);
            if !entry.referenced() && !entry.dirty() {
                self.hand = hand_after_eviction(position, len);
                return page;
            }
        }

        for offset in 0..len {
            let position = (start + offset) % len;
            let page = residents.get(position);
            let entry = table.entry_mut(page);
            entry.set_referenced(false);
            if !entry.dirty() {
                self.hand = hand_after_eviction(position, len);
                return page;
            }
        }

        // Every resident page is dirty; take the page under the cursor.
        self.hand = hand_after_eviction(start, len);
        residents.get(start)
    }

    fn name(&self) -> &'static str {
        "enhanced-clock"
    }
}
