//! # VMA Table
//!
//! The file-backed regions of one address space, kept in a fixed array of
//! [`VMA_SLOTS`] slots with a bitmap of the occupied ones.
//!
//! ## Placement
//!
//! New regions are carved downward from the top of the mmap window: each one
//! ends where the previous one starts. Space given back by
//! [`unmap_region`](VmaTable::unmap_region) is not reused.
//!
//! ```text
//!  floor                                         top₀ = MMAP_TOP
//!    │          ┌──────────┬────────┬─────────────┐│
//!    │  free    │ region 3 │ reg. 2 │  region 1   ││
//!    │          └──────────┴────────┴─────────────┘│
//!               ▲ top
//! ```
//!
//! ## Population
//!
//! Mapping a region installs no page-table entries. The first touch of a page
//! faults, and [`resolve_fault`](VmaTable::resolve_fault) reads the page from
//! the file. Unmapping tears down only the pages that were populated.

use crate::file::{BackingFile, FileError};
use crate::region::{Protection, Sharing, VmaRegion};
use alloc::sync::Arc;
use core::fmt;
use kernel_info::memory::{MMAP_FLOOR, MMAP_TOP, PAGE_SIZE, VMA_SLOTS};
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, page_round_up};
use kernel_vmem::{AddressSpace, CopyError, FrameAlloc, MapError, PhysMapper};
use log::{debug, trace, warn};

const _: () = assert!(VMA_SLOTS <= u128::BITS as usize);

/// Bitmap value with every slot occupied.
const ALL_SLOTS: u128 = if VMA_SLOTS == 128 {
    u128::MAX
} else {
    (1 << VMA_SLOTS) - 1
};

/// Why a region operation failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmaError {
    #[error("zero-length mapping")]
    ZeroLength,
    #[error("mapping grants no access")]
    NoAccess,
    #[error("file is not open for reading")]
    UnreadableFile,
    #[error("shared writable mapping of a read-only file")]
    ReadOnlyFile,
    #[error("no free region slot")]
    NoFreeSlot,
    #[error("mmap window exhausted")]
    OutOfAddressSpace,
    #[error("no region covers {0}")]
    NoSuchRegion(VirtualAddress),
    #[error("file offset {0:#x} plus the mapping length overflows")]
    OffsetOverflow(u64),
    #[error("page {0} is already present")]
    Present(VirtualAddress),
    #[error("file access failed: {0}")]
    File(#[from] FileError),
    #[error("page table update failed: {0}")]
    Map(#[from] MapError),
    #[error("user copy failed: {0}")]
    Copy(#[from] CopyError),
}

/// The regions of one address space.
pub struct VmaTable<F: ?Sized> {
    slots: [Option<VmaRegion<F>>; VMA_SLOTS],
    /// Bit `i` set: `slots[i]` holds a region.
    used: u128,
    /// Lower end of the most recent region; the next one ends here.
    top: VirtualAddress,
    /// No region starts below this address.
    floor: VirtualAddress,
}

impl<F: ?Sized> Default for VmaTable<F> {
    fn default() -> Self {
        Self::new(VirtualAddress::new(MMAP_TOP), VirtualAddress::new(MMAP_FLOOR))
    }
}

impl<F: ?Sized> VmaTable<F> {
    /// An empty table whose window is `[floor, top)`.
    ///
    /// # Panics
    /// If either end is not page-aligned or `floor` lies above `top`.
    #[must_use]
    pub fn new(top: VirtualAddress, floor: VirtualAddress) -> Self {
        assert!(
            top.is_page_aligned() && floor.is_page_aligned() && floor <= top,
            "vma table: bad window [{floor}, {top})"
        );
        Self {
            slots: core::array::from_fn(|_| None),
            used: 0,
            top,
            floor,
        }
    }

    /// Where the next region will end.
    #[inline]
    #[must_use]
    pub const fn top(&self) -> VirtualAddress {
        self.top
    }

    #[inline]
    #[must_use]
    pub const fn floor(&self) -> VirtualAddress {
        self.floor
    }

    /// Number of live regions.
    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.used.count_ones() as usize
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.used == 0
    }

    /// Live regions in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &VmaRegion<F>> {
        self.slots.iter().flatten()
    }

    /// The region covering `va`, if any.
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress) -> Option<&VmaRegion<F>> {
        self.iter().find(|region| region.contains(va))
    }

    fn free_slot(&self) -> Option<usize> {
        let free = !self.used & ALL_SLOTS;
        (free != 0).then(|| free.trailing_zeros() as usize)
    }

    fn insert(&mut self, slot: usize, region: VmaRegion<F>) {
        debug_assert!(self.slots[slot].is_none(), "vma slot {slot} taken");
        self.slots[slot] = Some(region);
        self.used |= 1 << slot;
    }

    fn remove(&mut self, slot: usize) -> Option<VmaRegion<F>> {
        self.used &= !(1 << slot);
        self.slots[slot].take()
    }

    fn slot_of(&self, start: VirtualAddress, end: VirtualAddress) -> Option<usize> {
        self.slots.iter().position(|slot| {
            slot.as_ref()
                .is_some_and(|region| region.start <= start && end <= region.end)
        })
    }
}

impl<F: BackingFile + ?Sized> VmaTable<F> {
    /// Reserve `len` bytes (rounded up to pages) of the mmap window for `file`.
    ///
    /// No frames are allocated and no page-table entries installed; pages are
    /// read in on first access through [`resolve_fault`](Self::resolve_fault).
    /// The region keeps a clone of `file`.
    ///
    /// # Errors
    /// - [`VmaError::ZeroLength`] for an empty request.
    /// - [`VmaError::NoAccess`] for an empty `protection`.
    /// - [`VmaError::OffsetOverflow`] if the file range past `file_offset`
    ///   does not fit a `u64`.
    /// - [`VmaError::UnreadableFile`] if `file` is not open for reading.
    /// - [`VmaError::ReadOnlyFile`] for a shared writable mapping of a file
    ///   not open for writing.
    /// - [`VmaError::NoFreeSlot`] if all slots are in use.
    /// - [`VmaError::OutOfAddressSpace`] if the window has no room left.
    pub fn map_region(
        &mut self,
        len: u64,
        protection: Protection,
        sharing: Sharing,
        file: &Arc<F>,
        file_offset: u64,
    ) -> Result<VirtualAddress, VmaError> {
        if len == 0 {
            return Err(VmaError::ZeroLength);
        }
        if protection.is_none() {
            return Err(VmaError::NoAccess);
        }
        let size = page_round_up(len).ok_or(VmaError::OutOfAddressSpace)?;
        if file_offset.checked_add(size).is_none() {
            return Err(VmaError::OffsetOverflow(file_offset));
        }
        if !file.readable() {
            return Err(VmaError::UnreadableFile);
        }
        if sharing == Sharing::Shared && protection.write() && !file.writable() {
            warn!("map_region: shared writable mapping of a read-only file");
            return Err(VmaError::ReadOnlyFile);
        }
        let Some(slot) = self.free_slot() else {
            warn!("map_region: all {VMA_SLOTS} region slots in use");
            return Err(VmaError::NoFreeSlot);
        };
        let start = self
            .top
            .as_u64()
            .checked_sub(size)
            .map(VirtualAddress::new)
            .filter(|&start| start >= self.floor)
            .ok_or(VmaError::OutOfAddressSpace)?;

        self.insert(
            slot,
            VmaRegion {
                start,
                end: self.top,
                protection,
                sharing,
                file: Arc::clone(file),
                file_offset,
            },
        );
        debug!("mapped region [{start}, {}) in slot {slot}", self.top);
        self.top = start;
        Ok(start)
    }

    /// Remove `[addr, addr + len)` from the region that contains it.
    ///
    /// The range is widened to whole pages. Exactly one region must cover it;
    /// the region then shrinks from either end, disappears, or is split in two
    /// with the right piece in a new slot. Shared writable regions write their
    /// dirty pages in the range back to the file first. Pages that were never
    /// populated are skipped.
    ///
    /// Returns the number of bytes removed.
    ///
    /// # Errors
    /// - [`VmaError::ZeroLength`] for an empty range.
    /// - [`VmaError::NoSuchRegion`] if no single region covers the range.
    /// - [`VmaError::NoFreeSlot`] if a split needs a slot and none is free.
    /// - [`VmaError::File`] / [`VmaError::Copy`] if write-back fails.
    ///
    /// On error the region and its pages are left as they were, except for
    /// pages already written back.
    pub fn unmap_region<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        aspace: &AddressSpace<'_, M>,
        alloc: &mut A,
        addr: VirtualAddress,
        len: u64,
    ) -> Result<u64, VmaError> {
        if len == 0 {
            return Err(VmaError::ZeroLength);
        }
        let start = addr.align_down();
        let end = addr
            .checked_add(len)
            .and_then(VirtualAddress::align_up)
            .ok_or(VmaError::NoSuchRegion(addr))?;
        let slot = self
            .slot_of(start, end)
            .ok_or(VmaError::NoSuchRegion(addr))?;
        let region = self.slots[slot]
            .as_ref()
            .ok_or(VmaError::NoSuchRegion(addr))?;

        let split = region.start < start && end < region.end;
        let spare = if split {
            Some(self.free_slot().ok_or(VmaError::NoFreeSlot)?)
        } else {
            None
        };
        // File offset backing `end`, for a right piece or a low shrink.
        let past_end = region
            .file_offset
            .checked_add(end.distance_from(region.start))
            .ok_or(VmaError::OffsetOverflow(region.file_offset))?;

        write_back(aspace, region, start, end)?;
        unmap_populated(aspace, alloc, start, end);

        let region = self.slots[slot]
            .as_mut()
            .ok_or(VmaError::NoSuchRegion(addr))?;
        if let Some(spare) = spare {
            let right = VmaRegion {
                start: end,
                file_offset: past_end,
                ..region.clone()
            };
            region.end = start;
            debug!(
                "split region into [{}, {start}) and [{end}, {})",
                region.start, right.end
            );
            self.insert(spare, right);
        } else if region.start == start && region.end == end {
            self.remove(slot);
            debug!("removed region [{start}, {end})");
        } else if region.start == start {
            region.file_offset = past_end;
            region.start = end;
            debug!("shrunk region to [{end}, {})", region.end);
        } else {
            region.end = start;
            debug!("shrunk region to [{}, {start})", region.start);
        }
        Ok(end.distance_from(start))
    }

    /// Populate the page holding `va` from the region that covers it.
    ///
    /// The frame is zeroed and filled with the file bytes backing the page; a
    /// short read at the end of the file leaves the rest zero. The page is
    /// mapped with the region's protection.
    ///
    /// # Errors
    /// - [`VmaError::NoSuchRegion`] if no region covers `va`.
    /// - [`VmaError::Present`] if the page is already mapped.
    /// - [`VmaError::File`] if the read fails.
    /// - [`VmaError::Map`] if no frame or table could be allocated.
    pub fn resolve_fault<M: PhysMapper, A: FrameAlloc>(
        &self,
        aspace: &AddressSpace<'_, M>,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, VmaError> {
        let region = self.lookup(va).ok_or(VmaError::NoSuchRegion(va))?;
        let page = va.align_down();
        if aspace.is_mapped(page) {
            return Err(VmaError::Present(page));
        }

        let mut buf = [0u8; PAGE_SIZE as usize];
        let offset = region.file_offset_of(page);
        let read = if offset < region.file.len() {
            region.file.read_at(&mut buf, offset)?
        } else {
            0
        };
        let frame = aspace.populate(alloc, page, region.leaf_flags(), &buf[..read])?;
        trace!("fault at {va}: {read} bytes from file offset {offset:#x} into {frame}");
        Ok(frame)
    }

    /// Write back and unmap every region, releasing the file references.
    ///
    /// Write-back failures are logged and skipped; the pages go away regardless.
    pub fn unmap_all<M: PhysMapper, A: FrameAlloc>(
        &mut self,
        aspace: &AddressSpace<'_, M>,
        alloc: &mut A,
    ) {
        for slot in 0..VMA_SLOTS {
            let Some(region) = self.remove(slot) else {
                continue;
            };
            if let Err(err) = write_back(aspace, &region, region.start, region.end) {
                warn!(
                    "unmap_all: write-back of [{}, {}) failed: {err}",
                    region.start, region.end
                );
            }
            unmap_populated(aspace, alloc, region.start, region.end);
            debug!("removed region [{}, {})", region.start, region.end);
        }
    }
}

/// Write the dirty, populated pages of `[start, end)` back to the region's file.
///
/// Writes never extend the file: each page is clamped to the current length.
fn write_back<F: BackingFile + ?Sized, M: PhysMapper>(
    aspace: &AddressSpace<'_, M>,
    region: &VmaRegion<F>,
    start: VirtualAddress,
    end: VirtualAddress,
) -> Result<(), VmaError> {
    if !region.writes_back() {
        return Ok(());
    }
    let mut buf = [0u8; PAGE_SIZE as usize];
    let mut va = start;
    while va < end {
        let page = va;
        va += PAGE_SIZE;
        if !aspace.leaf(page).is_some_and(|bits| bits.dirty()) {
            continue;
        }
        let offset = region.file_offset_of(page);
        let file_len = region.file.len();
        if offset >= file_len {
            continue;
        }
        let n = (file_len - offset).min(PAGE_SIZE) as usize;
        aspace.copy_in(&mut buf[..n], page)?;
        let written = region.file.write_at(&buf[..n], offset)?;
        if written < n {
            return Err(FileError::Io(offset + written as u64).into());
        }
        trace!("wrote back {page}: {n} bytes at file offset {offset:#x}");
    }
    Ok(())
}

/// Unmap and free every populated page of `[start, end)`.
fn unmap_populated<M: PhysMapper, A: FrameAlloc>(
    aspace: &AddressSpace<'_, M>,
    alloc: &mut A,
    start: VirtualAddress,
    end: VirtualAddress,
) {
    let mut va = start;
    while va < end {
        if aspace.is_mapped(va) {
            aspace.unmap(alloc, va, PAGE_SIZE, true);
        }
        va += PAGE_SIZE;
    }
}

impl<F: ?Sized> Clone for VmaTable<F> {
    fn clone(&self) -> Self {
        let mut table = Self::new(self.top, self.floor);
        table.clone_from(self);
        table
    }

    /// Copy every region of `source`; each copy holds its own file reference.
    fn clone_from(&mut self, source: &Self) {
        for (dst, src) in self.slots.iter_mut().zip(&source.slots) {
            dst.clone_from(src);
        }
        self.used = source.used;
        self.top = source.top;
        self.floor = source.floor;
        debug!("cloned {} regions", self.len());
    }
}

impl<F: ?Sized> fmt::Debug for VmaTable<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmaTable")
            .field("regions", &self.iter().collect::<alloc::vec::Vec<_>>())
            .field("top", &self.top)
            .field("floor", &self.floor)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoFile {
        readable: bool,
        writable: bool,
    }

    impl BackingFile for NoFile {
        fn readable(&self) -> bool {
            self.readable
        }

        fn writable(&self) -> bool {
            self.writable
        }

        fn len(&self) -> u64 {
            0
        }

        fn read_at(&self, _: &mut [u8], _: u64) -> Result<usize, FileError> {
            Ok(0)
        }

        fn write_at(&self, _: &[u8], _: u64) -> Result<usize, FileError> {
            Err(FileError::NotWritable)
        }
    }

    fn file(readable: bool, writable: bool) -> Arc<NoFile> {
        Arc::new(NoFile { readable, writable })
    }

    #[test]
    fn regions_stack_downward() {
        let mut table = VmaTable::default();
        let f = file(true, false);
        let a = table
            .map_region(100, Protection::read_only(), Sharing::Private, &f, 0)
            .unwrap();
        let b = table
            .map_region(2 * PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0)
            .unwrap();

        assert_eq!(a.as_u64(), MMAP_TOP - PAGE_SIZE);
        assert_eq!(b.as_u64(), a.as_u64() - 2 * PAGE_SIZE);
        assert_eq!(table.top(), b);
        assert_eq!(table.len(), 2);
        assert_eq!(Arc::strong_count(&f), 3);
        assert_eq!(table.lookup(a + 99).map(VmaRegion::start), Some(a));
        assert!(table.lookup(a + PAGE_SIZE).is_none());
    }

    #[test]
    fn requests_are_validated() {
        let mut table = VmaTable::default();
        let ro = file(true, false);
        assert_eq!(
            table.map_region(0, Protection::read_only(), Sharing::Private, &ro, 0),
            Err(VmaError::ZeroLength)
        );
        assert_eq!(
            table.map_region(8192, Protection::new(), Sharing::Private, &ro, 0),
            Err(VmaError::NoAccess)
        );
        assert_eq!(
            table.map_region(8192, Protection::read_write(), Sharing::Shared, &ro, 0),
            Err(VmaError::ReadOnlyFile)
        );
        assert_eq!(
            table.map_region(
                8192,
                Protection::read_only(),
                Sharing::Private,
                &file(false, true),
                0,
            ),
            Err(VmaError::UnreadableFile)
        );
        // Private writable mappings of read-only files are fine.
        assert!(
            table
                .map_region(8192, Protection::read_write(), Sharing::Private, &ro, 0)
                .is_ok()
        );
        assert_eq!(Arc::strong_count(&ro), 2);
    }

    #[test]
    fn file_range_must_fit_u64() {
        let mut table = VmaTable::default();
        let f = file(true, false);
        let top = table.top();
        let near_end = u64::MAX - PAGE_SIZE + 1;
        assert_eq!(
            table.map_region(
                2 * PAGE_SIZE,
                Protection::read_only(),
                Sharing::Private,
                &f,
                near_end,
            ),
            Err(VmaError::OffsetOverflow(near_end))
        );
        assert_eq!(
            table.map_region(
                PAGE_SIZE,
                Protection::read_only(),
                Sharing::Private,
                &f,
                near_end,
            ),
            Err(VmaError::OffsetOverflow(near_end))
        );
        assert!(table.is_empty());
        assert_eq!(table.top(), top);
        assert_eq!(Arc::strong_count(&f), 1);

        // Highest page-aligned offset whose page still ends below the limit.
        let last = u64::MAX - 2 * PAGE_SIZE + 1;
        let at = table
            .map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, last)
            .unwrap();
        assert_eq!(table.lookup(at).map(|r| r.file_offset_of(at)), Some(last));
    }

    #[test]
    fn slots_run_out() {
        let mut table = VmaTable::default();
        let f = file(true, true);
        for _ in 0..VMA_SLOTS {
            table
                .map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0)
                .unwrap();
        }
        let top = table.top();
        assert_eq!(
            table.map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0),
            Err(VmaError::NoFreeSlot)
        );
        assert_eq!(table.top(), top);
        assert_eq!(Arc::strong_count(&f), VMA_SLOTS + 1);
    }

    #[test]
    fn window_runs_out() {
        let top = VirtualAddress::new(0x10_0000);
        let mut table = VmaTable::new(top, VirtualAddress::new(0x10_0000 - 4 * PAGE_SIZE));
        let f = file(true, true);
        table
            .map_region(3 * PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0)
            .unwrap();
        assert_eq!(
            table.map_region(2 * PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0),
            Err(VmaError::OutOfAddressSpace)
        );
        assert!(
            table
                .map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0)
                .is_ok()
        );
        assert_eq!(table.top(), table.floor());
    }

    #[test]
    fn clone_takes_a_reference_per_region() {
        let mut table = VmaTable::default();
        let f = file(true, true);
        for _ in 0..3 {
            table
                .map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &f, 0)
                .unwrap();
        }
        let copy = table.clone();
        assert_eq!(copy.len(), 3);
        assert_eq!(copy.top(), table.top());
        assert_eq!(Arc::strong_count(&f), 7);

        let mut other = VmaTable::default();
        other
            .map_region(PAGE_SIZE, Protection::read_only(), Sharing::Private, &file(true, true), 0)
            .unwrap();
        other.clone_from(&table);
        assert_eq!(other.len(), 3);
        assert_eq!(Arc::strong_count(&f), 10);

        drop(copy);
        drop(other);
        assert_eq!(Arc::strong_count(&f), 4);
    }
}
