use crate::{MemoryAddress, PAGE_SIZE, PageOffset, VirtualAddress};
use core::fmt;

/// Virtual page base.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(MemoryAddress);

impl VirtualPage {
    /// The page containing `va` (rounds down).
    #[inline]
    #[must_use]
    pub const fn from_addr(va: VirtualAddress) -> Self {
        Self(va.0.page_base())
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> VirtualAddress {
        VirtualAddress(MemoryAddress::new(self.0.as_u64() + off.as_u64()))
    }

    /// The page `n` pages above this one.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u64) -> Self {
        Self(MemoryAddress::new(self.0.as_u64() + n * PAGE_SIZE))
    }

    /// Number of pages from `self` up to (excluding) `end`.
    ///
    /// ### Debug assertions
    /// - Asserts `self <= end`.
    #[inline]
    #[must_use]
    pub const fn pages_until(self, end: Self) -> u64 {
        debug_assert!(self.0.as_u64() <= end.0.as_u64());
        (end.0.as_u64() - self.0.as_u64()) / PAGE_SIZE
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage({:#018X})", self.0.as_u64())
    }
}
