use kernel_info::memory::{PAGE_SHIFT, PTE_PER_TABLE};
use kernel_memory_addresses::VirtualAddress;

/// Level of a table in the 3-level tree.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum PageTableLevel {
    /// Leaf table; its entries map 4 KiB pages (VA bits `[20:12]`).
    Leaf = 0,
    /// Middle table (VA bits `[29:21]`).
    Middle = 1,
    /// Root table, one per address space (VA bits `[38:30]`).
    Root = 2,
}

impl PageTableLevel {
    /// The level a walk visits after this one, or `None` below the leaf table.
    #[inline]
    #[must_use]
    pub const fn next_lower(self) -> Option<Self> {
        match self {
            Self::Root => Some(Self::Middle),
            Self::Middle => Some(Self::Leaf),
            Self::Leaf => None,
        }
    }

    #[inline]
    const fn shift(self) -> u32 {
        PAGE_SHIFT + 9 * self as u32
    }
}

/// Index into one page table (`0..512`).
///
/// Strongly typed so that raw integers never index a table directly.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TableIndex(u16);

impl TableIndex {
    /// The 9 index bits `va` selects at `level`.
    #[inline]
    #[must_use]
    pub const fn of(va: VirtualAddress, level: PageTableLevel) -> Self {
        Self::new(((va.as_u64() >> level.shift()) & 0x1FF) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 512` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!((v as usize) < PTE_PER_TABLE);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// All 512 indices in ascending order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..PTE_PER_TABLE as u16).map(Self)
    }
}
