//! # Address Space (Sv39, 3-level)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space: the translation tree rooted at one [`PageTable`].
//!
//! ## Highlights
//!
//! - [`AddressSpace::walk`] / [`AddressSpace::walk_or_create`] descend to the
//!   leaf slot for an address, the latter allocating missing tables.
//! - [`AddressSpace::map`] / [`AddressSpace::unmap`] install and clear runs of
//!   4 KiB leaves. Remapping a valid leaf or unmapping a missing one is a bug
//!   in the caller and panics.
//! - [`AddressSpace::translate`] resolves user-accessible mappings only.
//! - [`AddressSpace::duplicate_into`] copies a process image page by page.
//! - [`AddressSpace::copy_out`] / [`AddressSpace::copy_in`] /
//!   [`AddressSpace::copy_in_str`] move bytes across the user/kernel boundary.
//! - [`AddressSpace::destroy`] frees the tables once every leaf is gone.
//!
//! ## Design
//!
//! - The handle does not own its frames and performs no locking; callers
//!   guarantee a single mutator per address space.
//! - Frames come from a [`FrameAlloc`] passed to each call that needs one.
//!   Interior tables created by a failed walk are left in place; they are
//!   reclaimed by [`destroy`](AddressSpace::destroy).
//! - Keeps `unsafe` confined to reaching a frame through the [`PhysMapper`].
//!
//! ## Safety
//!
//! - Mutating an active address space requires `sfence.vma` afterwards.
//! - The provided `PhysMapper` must yield **writable** references to frames.

mod copy;
mod duplicate;
mod user;

use crate::page_table::{PageTableLevel, TableIndex};
use crate::{
    EntryKind, FrameAlloc, MapError, PageEntryBits, PageTable, PageTableEntry, PhysMapper,
    WalkError,
};
use kernel_info::memory::{MAX_VIRTUAL_ADDRESS, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage};

/// Sv39 translation mode in the `satp` register.
const SATP_SV39: u64 = 8 << 60;

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: PhysicalPage,
    mapper: &'m M,
}

/// Location of one leaf entry: a leaf table plus the index inside it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeafSlot {
    table: PhysicalPage,
    index: TableIndex,
}

impl LeafSlot {
    /// The leaf table holding the entry.
    #[must_use]
    pub const fn table(&self) -> PhysicalPage {
        self.table
    }

    #[must_use]
    pub const fn index(&self) -> TableIndex {
        self.index
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Allocate and zero a fresh root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if no frame is available.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        let root = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;
        let space = Self { root, mapper };
        space.table(root).zero();
        Ok(space)
    }

    /// Wrap an existing root table.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: PhysicalPage) -> Self {
        Self { root, mapper }
    }

    /// Physical page of the root table.
    #[inline]
    pub const fn root_page(&self) -> PhysicalPage {
        self.root
    }

    #[inline]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// The `satp` value that activates this address space.
    #[inline]
    pub const fn satp(&self) -> u64 {
        SATP_SV39 | self.root.frame_number()
    }

    /// Borrow the table in `page`.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn table(&self, page: PhysicalPage) -> &mut PageTable {
        // SAFETY: `page` is a table of this tree; the caller is the only mutator.
        unsafe { self.mapper.phys_to_mut(page.base()) }
    }

    /// Read the entry at `slot`.
    #[inline]
    pub fn entry(&self, slot: LeafSlot) -> PageTableEntry {
        self.table(slot.table).get(slot.index)
    }

    #[inline]
    pub(crate) fn set_entry(&self, slot: LeafSlot, entry: PageTableEntry) {
        self.table(slot.table).set(slot.index, entry);
    }

    /// Walk to the leaf slot for `va` without allocating.
    ///
    /// Returns `Ok(None)` if an interior table on the way is missing.
    ///
    /// # Errors
    /// [`WalkError::OutOfRange`] if `va` is not translatable.
    pub fn walk(&self, va: VirtualAddress) -> Result<Option<LeafSlot>, WalkError> {
        check_range(va)?;
        let mut table = self.root;
        let mut level = PageTableLevel::Root;
        loop {
            let index = TableIndex::of(va, level);
            let Some(lower) = level.next_lower() else {
                return Ok(Some(LeafSlot { table, index }));
            };
            match self.table(table).get(index).next_table() {
                Some(child) => table = child,
                None => return Ok(None),
            }
            level = lower;
        }
    }

    /// Walk to the leaf slot for `va`, creating zeroed interior tables on the way.
    ///
    /// # Errors
    /// - [`WalkError::OutOfRange`] if `va` is not translatable.
    /// - [`WalkError::OutOfMemory`] if a table frame could not be allocated.
    ///   Tables created before the failure stay linked in.
    pub fn walk_or_create<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<LeafSlot, WalkError> {
        check_range(va)?;
        let mut table = self.root;
        let mut level = PageTableLevel::Root;
        loop {
            let index = TableIndex::of(va, level);
            let Some(lower) = level.next_lower() else {
                return Ok(LeafSlot { table, index });
            };
            let entry = self.table(table).get(index);
            table = match entry.kind() {
                Some(EntryKind::NextTable(child)) => child,
                None => {
                    let child = alloc.alloc_4k().ok_or(WalkError::OutOfMemory)?;
                    self.table(child).zero();
                    self.table(table).set(index, PageTableEntry::table(child));
                    child
                }
                Some(EntryKind::Leaf(..)) => {
                    panic!("walk: unexpected leaf above level 0 for {va}")
                }
            };
            level = lower;
        }
    }

    /// The slot for `va` if it holds a valid leaf.
    pub(crate) fn leaf_slot(&self, va: VirtualAddress) -> Option<LeafSlot> {
        let slot = self.walk(va).ok()??;
        self.entry(slot).is_leaf().then_some(slot)
    }

    /// The slot for `va` if it holds a valid, user-accessible leaf.
    pub(crate) fn user_leaf_slot(&self, va: VirtualAddress) -> Option<LeafSlot> {
        self.leaf_slot(va)
            .filter(|slot| self.entry(*slot).bits().user())
    }

    /// Bits of the leaf mapping `va`, if any (user or kernel).
    #[must_use]
    pub fn leaf(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        self.leaf_slot(va).map(|slot| self.entry(slot).bits())
    }

    /// `true` if the page containing `va` has a valid leaf.
    #[must_use]
    pub fn is_mapped(&self, va: VirtualAddress) -> bool {
        self.leaf_slot(va).is_some()
    }

    /// Map every page in `[va, va + size)` to consecutive frames starting at `pa`.
    ///
    /// `va` and `pa` are rounded down to their pages; the range covers every
    /// page touched by the `size` bytes.
    ///
    /// # Panics
    /// - If `size` is zero.
    /// - If any target page is already mapped (no silent remap).
    ///
    /// # Errors
    /// - [`MapError::OutOfRange`] if the range is not translatable.
    /// - [`MapError::OutOfMemory`] if a table frame could not be allocated.
    ///   Leaves installed by this call are cleared again before returning.
    pub fn map<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        perm: PageEntryBits,
    ) -> Result<(), MapError> {
        assert!(size > 0, "map: zero size at {va}");
        let first = va.page();
        let last = va
            .checked_add(size - 1)
            .ok_or(MapError::OutOfRange(va))?
            .page();
        let frame = pa.page();

        for i in 0..=first.pages_until(last) {
            let page = first.add_pages(i);
            let slot = match self.walk_or_create(alloc, page.base()) {
                Ok(slot) => slot,
                Err(err) => {
                    self.clear_leaves(first, i);
                    return Err(err.into());
                }
            };
            assert!(
                !self.entry(slot).is_valid(),
                "remap: {page} already mapped"
            );
            self.set_entry(slot, PageTableEntry::leaf(frame.add_pages(i), perm));
        }
        Ok(())
    }

    /// Clear `pages` leaves starting at `first` without touching their frames.
    fn clear_leaves(&self, first: VirtualPage, pages: u64) {
        for i in 0..pages {
            if let Some(slot) = self.leaf_slot(first.add_pages(i).base()) {
                self.set_entry(slot, PageTableEntry::zero());
            }
        }
    }

    /// Remove the mappings for `[va, va + size)`, optionally releasing the frames.
    ///
    /// Every page is checked before the first entry is cleared.
    ///
    /// # Panics
    /// - If `va` or `size` is not page-aligned.
    /// - If any page in the range is not mapped by a leaf.
    pub fn unmap<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        size: u64,
        free_frames: bool,
    ) {
        assert!(va.is_page_aligned(), "unmap: {va} not aligned");
        assert!(
            size.is_multiple_of(PAGE_SIZE),
            "unmap: size {size:#x} not a page multiple"
        );
        let first = va.page();
        let pages = size / PAGE_SIZE;

        for i in 0..pages {
            let page = first.add_pages(i);
            match self.walk(page.base()) {
                Ok(Some(slot)) if self.entry(slot).is_leaf() => {}
                Ok(Some(slot)) if self.entry(slot).is_valid() => {
                    panic!("unmap: {page} is not a leaf")
                }
                _ => panic!("unmap: {page} not mapped"),
            }
        }

        for i in 0..pages {
            if let Some(slot) = self.leaf_slot(first.add_pages(i).base()) {
                let entry = self.entry(slot);
                self.set_entry(slot, PageTableEntry::zero());
                if free_frames {
                    alloc.free_4k(entry.bits().physical_page());
                }
            }
        }
    }

    /// Translate a user-accessible `va` to its physical address.
    ///
    /// Kernel-only mappings resolve to `None`; use
    /// [`translate_kernel`](Self::translate_kernel) for those.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let slot = self.user_leaf_slot(va)?;
        Some(self.entry(slot).bits().physical_page().join(va.offset()))
    }

    /// Translate any mapped `va`, user or kernel.
    #[must_use]
    pub fn translate_kernel(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let slot = self.leaf_slot(va)?;
        Some(self.entry(slot).bits().physical_page().join(va.offset()))
    }

    /// Install a boot-time kernel mapping.
    ///
    /// # Panics
    /// If the mapping cannot be installed; the kernel cannot run without it.
    pub fn map_kernel<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
        perm: PageEntryBits,
    ) {
        if let Err(err) = self.map(alloc, va, pa, size, perm) {
            panic!("map_kernel: {va} -> {pa}: {err}");
        }
    }

    /// Free the whole tree.
    ///
    /// # Panics
    /// If any leaf is still valid; callers unmap every leaf first.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) {
        self.free_table(alloc, self.root);
    }

    fn free_table<A: FrameAlloc>(&self, alloc: &mut A, table: PhysicalPage) {
        for (index, entry) in self.table(table).valid_entries() {
            match entry.kind() {
                Some(EntryKind::NextTable(child)) => self.free_table(alloc, child),
                _ => panic!(
                    "destroy: live leaf in table {table} at index {}",
                    index.as_usize()
                ),
            }
        }
        alloc.free_4k(table);
    }
}

#[inline]
const fn check_range(va: VirtualAddress) -> Result<(), WalkError> {
    if va.as_u64() >= MAX_VIRTUAL_ADDRESS {
        Err(WalkError::OutOfRange(va))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestRam;
    use std::panic::{AssertUnwindSafe, catch_unwind};

    const VA: VirtualAddress = VirtualAddress::new(0x40_0000);

    fn frame_pa(i: u64) -> PhysicalAddress {
        PhysicalAddress::new(0x8800_0000 + i * PAGE_SIZE)
    }

    #[test]
    fn create_zeroes_root() {
        let mut ram = TestRam::with_frames(4);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        assert_eq!(ram.in_use(), 1);
        assert_eq!(space.table(space.root_page()).valid_entries().count(), 0);
        assert_eq!(space.satp() & ((1 << 44) - 1), space.root_page().frame_number());
        assert_eq!(space.satp() >> 60, 8);
    }

    #[test]
    fn walk_without_allocating_finds_nothing() {
        let mut ram = TestRam::with_frames(4);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        assert_eq!(space.walk(VA), Ok(None));
        assert_eq!(ram.in_use(), 1);
    }

    #[test]
    fn map_then_translate_each_page() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();

        space
            .map(&mut ram, VA, frame_pa(0), 3 * PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();
        // root + middle + leaf table
        assert_eq!(ram.in_use(), 3);

        for i in 0..3 {
            let va = VA + i * PAGE_SIZE + 0x10;
            assert_eq!(space.translate(va), Some(frame_pa(i) + 0x10));
        }
        assert_eq!(space.translate(VA + 3 * PAGE_SIZE), None);

        space.unmap(&mut ram, VA, 3 * PAGE_SIZE, false);
        for i in 0..3 {
            assert_eq!(space.translate(VA + i * PAGE_SIZE), None);
        }
    }

    #[test]
    fn unaligned_map_covers_touched_pages() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();

        // 2 bytes straddling a page boundary touch two pages.
        space
            .map(&mut ram, VA + (PAGE_SIZE - 1), frame_pa(0), 2, PageEntryBits::user_rw())
            .unwrap();
        assert!(space.is_mapped(VA));
        assert!(space.is_mapped(VA + PAGE_SIZE));
        assert!(!space.is_mapped(VA + 2 * PAGE_SIZE));
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn remap_is_fatal() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space
            .map(&mut ram, VA, frame_pa(0), PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();
        let _ = space.map(&mut ram, VA, frame_pa(1), PAGE_SIZE, PageEntryBits::user_rw());
    }

    #[test]
    #[should_panic(expected = "not mapped")]
    fn unmapping_a_hole_is_fatal() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space.unmap(&mut ram, VA, PAGE_SIZE, false);
    }

    #[test]
    fn failed_unmap_leaves_range_untouched() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space
            .map(&mut ram, VA, frame_pa(0), PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();

        let res = catch_unwind(AssertUnwindSafe(|| {
            space.unmap(&mut ram, VA, 2 * PAGE_SIZE, false);
        }));
        assert!(res.is_err());
        assert_eq!(space.translate(VA), Some(frame_pa(0)));
    }

    #[test]
    fn translate_skips_kernel_only_pages() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space.map_kernel(&mut ram, VA, frame_pa(0), PAGE_SIZE, PageEntryBits::kernel_rw());

        assert_eq!(space.translate(VA), None);
        assert_eq!(space.translate_kernel(VA + 8), Some(frame_pa(0) + 8));
        assert!(space.leaf(VA).is_some_and(|bits| !bits.user()));
    }

    #[test]
    fn out_of_range_is_an_error() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        let top = VirtualAddress::new(MAX_VIRTUAL_ADDRESS);
        assert_eq!(
            space.map(&mut ram, top, frame_pa(0), PAGE_SIZE, PageEntryBits::user_rw()),
            Err(MapError::OutOfRange(top))
        );
        assert_eq!(space.walk(top), Err(WalkError::OutOfRange(top)));
        assert_eq!(space.translate(top), None);
    }

    #[test]
    fn out_of_memory_rolls_back_installed_leaves() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();

        // Last page of one leaf table plus first page of the next one.
        let va = VirtualAddress::new(0x1F_F000);
        let held = ram.limit(2);
        assert_eq!(
            space.map(&mut ram, va, frame_pa(0), 2 * PAGE_SIZE, PageEntryBits::user_rw()),
            Err(MapError::OutOfMemory)
        );
        assert!(!space.is_mapped(va));
        assert!(!space.is_mapped(va + PAGE_SIZE));
        ram.restore(held);

        space.destroy(&mut ram);
        assert_eq!(ram.in_use(), 0);
    }

    #[test]
    fn unmap_can_release_frames() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        let frame = ram.alloc_4k().unwrap();
        space
            .map(&mut ram, VA, frame.base(), PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();
        let before = ram.available();
        space.unmap(&mut ram, VA, PAGE_SIZE, true);
        assert_eq!(ram.available(), before + 1);
    }

    #[test]
    fn destroy_returns_every_table() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space
            .map(&mut ram, VA, frame_pa(0), PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();
        space
            .map(
                &mut ram,
                VirtualAddress::new(0x20_0000_0000),
                frame_pa(1),
                PAGE_SIZE,
                PageEntryBits::user_rw(),
            )
            .unwrap();
        // root + 2 * (middle + leaf)
        assert_eq!(ram.in_use(), 5);

        space.unmap(&mut ram, VA, PAGE_SIZE, false);
        space.unmap(&mut ram, VirtualAddress::new(0x20_0000_0000), PAGE_SIZE, false);
        space.destroy(&mut ram);
        assert_eq!(ram.in_use(), 0);
    }

    #[test]
    #[should_panic(expected = "live leaf")]
    fn destroy_with_live_leaf_is_fatal() {
        let mut ram = TestRam::with_frames(8);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        space
            .map(&mut ram, VA, frame_pa(0), PAGE_SIZE, PageEntryBits::user_rw())
            .unwrap();
        space.destroy(&mut ram);
    }
}
