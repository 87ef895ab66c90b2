use crate::{MemoryAddress, PAGE_SHIFT, PAGE_SIZE, PageOffset, PhysicalAddress};
use core::fmt;

/// Physical page (frame) base.
///
/// ### Invariants
/// - The low 12 bits of the base are always zero.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x8000_5678);
/// let pp = pa.page();
/// assert_eq!(pp.base().as_u64(), 0x8000_5000);
/// assert_eq!(pp.join(pa.offset()), pa);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(MemoryAddress);

impl PhysicalPage {
    /// The page containing `pa` (rounds down).
    #[inline]
    #[must_use]
    pub const fn from_addr(pa: PhysicalAddress) -> Self {
        Self(pa.0.page_base())
    }

    /// Build from a physical page number (address >> 12).
    #[inline]
    #[must_use]
    pub const fn from_frame_number(ppn: u64) -> Self {
        Self(MemoryAddress::new(ppn << PAGE_SHIFT))
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress(self.0)
    }

    #[inline]
    #[must_use]
    pub const fn frame_number(self) -> u64 {
        self.0.as_u64() >> PAGE_SHIFT
    }

    #[inline]
    #[must_use]
    pub const fn join(self, off: PageOffset) -> PhysicalAddress {
        PhysicalAddress(MemoryAddress::new(self.0.as_u64() + off.as_u64()))
    }

    /// The page `n` frames above this one.
    #[inline]
    #[must_use]
    pub const fn add_pages(self, n: u64) -> Self {
        Self(MemoryAddress::new(self.0.as_u64() + n * PAGE_SIZE))
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage({:#018X})", self.0.as_u64())
    }
}
