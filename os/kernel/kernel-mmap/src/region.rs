use alloc::sync::Arc;
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::PageEntryBits;

/// Access a mapping grants to user code.
///
/// ### Example
/// ```rust
/// # use kernel_mmap::Protection;
/// let prot = Protection::new().with_read(true).with_write(true);
/// assert!(!prot.is_none());
/// assert!(Protection::new().is_none());
/// ```
#[bitfield(u8)]
#[derive(PartialEq, Eq)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub exec: bool,
    #[bits(5)]
    __: u8,
}

impl Protection {
    /// No access at all.
    #[inline]
    #[must_use]
    pub const fn is_none(&self) -> bool {
        !self.read() && !self.write() && !self.exec()
    }

    #[inline]
    #[must_use]
    pub const fn read_only() -> Self {
        Self::new().with_read(true)
    }

    #[inline]
    #[must_use]
    pub const fn read_write() -> Self {
        Self::new().with_read(true).with_write(true)
    }
}

/// Whether stores reach the backing file.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Sharing {
    /// Stores stay in the process.
    Private,
    /// Dirty pages are written back when they are unmapped.
    Shared,
}

/// One file-backed range `[start, end)` of a user address space.
pub struct VmaRegion<F: ?Sized> {
    pub(crate) start: VirtualAddress,
    pub(crate) end: VirtualAddress,
    pub(crate) protection: Protection,
    pub(crate) sharing: Sharing,
    pub(crate) file: Arc<F>,
    /// File offset backing `start`; `file_offset + len()` never overflows.
    pub(crate) file_offset: u64,
}

impl<F: ?Sized> VmaRegion<F> {
    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// One past the last byte.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Length in bytes, always a page multiple.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> u64 {
        self.end.distance_from(self.start)
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    #[inline]
    #[must_use]
    pub const fn protection(&self) -> Protection {
        self.protection
    }

    #[inline]
    #[must_use]
    pub const fn sharing(&self) -> Sharing {
        self.sharing
    }

    #[inline]
    #[must_use]
    pub const fn file(&self) -> &Arc<F> {
        &self.file
    }

    #[inline]
    #[must_use]
    pub const fn file_offset(&self) -> u64 {
        self.file_offset
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, va: VirtualAddress) -> bool {
        self.start <= va && va < self.end
    }

    /// File offset backing the page that holds `va`.
    ///
    /// ### Debug assertions
    /// - Asserts `va` lies inside the region.
    #[inline]
    #[must_use]
    pub fn file_offset_of(&self, va: VirtualAddress) -> u64 {
        debug_assert!(self.contains(va), "{va} outside {self:?}");
        self.file_offset + va.align_down().distance_from(self.start)
    }

    /// Writes reach the file.
    #[inline]
    #[must_use]
    pub fn writes_back(&self) -> bool {
        self.sharing == Sharing::Shared && self.protection.write()
    }

    /// User leaf permissions for pages of this region.
    ///
    /// Sv39 reserves writable-but-unreadable leaves, so write access implies read.
    #[inline]
    #[must_use]
    pub const fn leaf_flags(&self) -> PageEntryBits {
        PageEntryBits::new()
            .with_user(true)
            .with_readable(self.protection.read() || self.protection.write())
            .with_writable(self.protection.write())
            .with_executable(self.protection.exec())
    }
}

impl<F: ?Sized> Clone for VmaRegion<F> {
    fn clone(&self) -> Self {
        Self {
            start: self.start,
            end: self.end,
            protection: self.protection,
            sharing: self.sharing,
            file: Arc::clone(&self.file),
            file_offset: self.file_offset,
        }
    }
}

impl<F: ?Sized> fmt::Debug for VmaRegion<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmaRegion")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("protection", &self.protection)
            .field("sharing", &self.sharing)
            .field("file_offset", &self.file_offset)
            .field("file_refs", &Arc::strong_count(&self.file))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(prot: Protection, sharing: Sharing) -> VmaRegion<()> {
        VmaRegion {
            start: VirtualAddress::new(0x10_0000),
            end: VirtualAddress::new(0x10_3000),
            protection: prot,
            sharing,
            file: Arc::new(()),
            file_offset: 0x2000,
        }
    }

    #[test]
    fn offsets_follow_pages() {
        let r = region(Protection::read_only(), Sharing::Private);
        assert_eq!(r.len(), 0x3000);
        assert!(r.contains(VirtualAddress::new(0x10_2FFF)));
        assert!(!r.contains(r.end()));
        assert_eq!(r.file_offset_of(VirtualAddress::new(0x10_0000)), 0x2000);
        assert_eq!(r.file_offset_of(VirtualAddress::new(0x10_1ABC)), 0x3000);
    }

    #[test]
    fn leaf_flags_are_user_pages() {
        let r = region(Protection::read_write(), Sharing::Shared);
        let bits = r.leaf_flags();
        assert!(bits.user() && bits.readable() && bits.writable());
        assert!(!bits.executable() && !bits.valid());
        assert!(r.writes_back());
        assert!(!region(Protection::read_write(), Sharing::Private).writes_back());
        assert!(!region(Protection::read_only(), Sharing::Shared).writes_back());
    }

    #[test]
    fn write_only_pages_are_readable() {
        let r = region(Protection::new().with_write(true), Sharing::Private);
        let bits = r.leaf_flags();
        assert!(bits.writable() && bits.readable());
        let x = region(Protection::new().with_exec(true), Sharing::Private);
        assert!(x.leaf_flags().executable() && !x.leaf_flags().readable());
    }

    #[test]
    fn clones_share_the_file() {
        let r = region(Protection::read_only(), Sharing::Private);
        let copy = r.clone();
        assert!(Arc::ptr_eq(r.file(), copy.file()));
        assert_eq!(Arc::strong_count(r.file()), 2);
        drop(copy);
        assert_eq!(Arc::strong_count(r.file()), 1);
    }
}
