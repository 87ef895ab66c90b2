use crate::PAGE_SIZE;
use core::fmt;

/// Byte offset inside a 4 KiB page, always in `0..4096`.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageOffset(u16);

impl PageOffset {
    /// Wrap a raw in-page offset.
    ///
    /// ### Debug assertions
    /// - Asserts `value < 4096` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(value: u16) -> Self {
        debug_assert!((value as u64) < PAGE_SIZE);
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0 as u64
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Bytes left in the page from this offset on (`1..=4096`).
    #[inline]
    #[must_use]
    pub const fn remaining(self) -> u64 {
        PAGE_SIZE - self.0 as u64
    }
}

impl fmt::Debug for PageOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageOffset({:#05X})", self.0)
    }
}
