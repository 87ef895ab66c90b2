//! # Sv39 Page Table
//!
//! One table is a 4 KiB-aligned array of 512 entries. The same type is used
//! at every level; [`TableIndex::of`] extracts the 9-bit index a virtual
//! address selects at a given [`PageTableLevel`].
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! | Root  | Middle| Leaf  | Offset |
//! ```

mod index;

pub use index::{PageTableLevel, TableIndex};

use crate::PageEntryBits;
use kernel_info::memory::PTE_PER_TABLE;
use kernel_memory_addresses::PhysicalPage;

/// A single page table entry.
///
/// All permission/status bits live inside the inner [`PageEntryBits`].
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PageTableEntry(PageEntryBits);

/// What a valid entry refers to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    /// Points to the child table in this frame.
    NextTable(PhysicalPage),
    /// Maps a 4 KiB page with these bits.
    Leaf(PhysicalPage, PageEntryBits),
}

/// 512 entries, 4 KiB-aligned.
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PageTableEntry; PTE_PER_TABLE],
}

const _: () = assert!(size_of::<PageTable>() == 4096);

impl PageTableEntry {
    /// Create a zero (invalid) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    /// Entry pointing at a child table.
    #[inline]
    #[must_use]
    pub const fn table(child: PhysicalPage) -> Self {
        Self(PageEntryBits::new().with_valid(true).with_physical_page(child))
    }

    /// Leaf entry mapping `page` with the permission bits of `perm`.
    ///
    /// ### Debug assertions
    /// - Asserts that `perm` carries at least one of `R`/`W`/`X`; without
    ///   them the entry would read back as a table pointer.
    #[inline]
    #[must_use]
    pub const fn leaf(page: PhysicalPage, perm: PageEntryBits) -> Self {
        let bits = perm.permissions().with_valid(true).with_physical_page(page);
        debug_assert!(bits.is_leaf(), "leaf entry without R/W/X");
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: PageEntryBits) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0.valid()
    }

    #[inline]
    #[must_use]
    pub const fn is_leaf(self) -> bool {
        self.0.is_leaf()
    }

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn bits(self) -> PageEntryBits {
        self.0
    }

    /// Classify a valid entry; `None` if invalid.
    #[inline]
    #[must_use]
    pub const fn kind(self) -> Option<EntryKind> {
        if !self.is_valid() {
            return None;
        }
        let page = self.0.physical_page();
        if self.is_leaf() {
            Some(EntryKind::Leaf(page, self.0))
        } else {
            Some(EntryKind::NextTable(page))
        }
    }

    /// The child table, if this is a valid non-leaf entry.
    #[inline]
    #[must_use]
    pub const fn next_table(self) -> Option<PhysicalPage> {
        match self.kind() {
            Some(EntryKind::NextTable(page)) => Some(page),
            _ => None,
        }
    }
}

impl PageTable {
    /// Invalidate all entries.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PageTableEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: TableIndex) -> PageTableEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: TableIndex, e: PageTableEntry) {
        self.entries[i.as_usize()] = e;
    }

    /// Index/entry pairs of all valid entries.
    pub fn valid_entries(&self) -> impl Iterator<Item = (TableIndex, PageTableEntry)> + '_ {
        TableIndex::all()
            .map(|i| (i, self.get(i)))
            .filter(|(_, e)| e.is_valid())
    }
}
