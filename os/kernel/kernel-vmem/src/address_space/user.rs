use crate::address_space::AddressSpace;
use crate::{FrameAlloc, MapError, PageEntryBits, PageTableEntry, PhysMapper, frame_bytes};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress, page_round_up};
use log::trace;

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Back the page holding `va` with a fresh frame.
    ///
    /// The frame is zeroed, `data` is copied to its start and the page is
    /// mapped with `perm`. If the mapping fails the frame goes back to `alloc`.
    ///
    /// # Panics
    /// If `data` is larger than a page, or the page is already mapped.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] or [`MapError::OutOfRange`] from the mapping.
    pub fn populate<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        perm: PageEntryBits,
        data: &[u8],
    ) -> Result<PhysicalPage, MapError> {
        assert!(
            data.len() <= PAGE_SIZE as usize,
            "populate: {} bytes do not fit a page",
            data.len()
        );
        let frame = alloc.alloc_4k().ok_or(MapError::OutOfMemory)?;

        // SAFETY: the frame was just handed out and is not mapped anywhere yet.
        let bytes = unsafe { frame_bytes(self.mapper, frame) };
        bytes.fill(0);
        bytes[..data.len()].copy_from_slice(data);

        if let Err(err) = self.map(alloc, va.page().base(), frame.base(), PAGE_SIZE, perm) {
            alloc.free_4k(frame);
            return Err(err);
        }
        Ok(frame)
    }

    /// Grow the user image from `old` to `new` bytes with zeroed RWX pages.
    ///
    /// Returns the new size; a `new` below `old` is a no-op returning `old`.
    ///
    /// # Errors
    /// If any page cannot be added. Pages added by this call are released
    /// again, so the image keeps its old size.
    pub fn grow<A: FrameAlloc>(&self, alloc: &mut A, old: u64, new: u64) -> Result<u64, MapError> {
        if new < old {
            return Ok(old);
        }
        let mut va = page_round_up(old).ok_or(MapError::OutOfRange(VirtualAddress::new(old)))?;
        while va < new {
            if let Err(err) =
                self.populate(alloc, VirtualAddress::new(va), PageEntryBits::user_rwx(), &[])
            {
                self.shrink(alloc, va, old);
                return Err(err);
            }
            va += PAGE_SIZE;
        }
        trace!("grew user image from {old:#x} to {new:#x}");
        Ok(new)
    }

    /// Shrink the user image from `old` to `new` bytes, releasing whole pages.
    ///
    /// Returns the new size; a `new` at or above `old` is a no-op returning `old`.
    ///
    /// # Panics
    /// If a page between the two sizes is not mapped.
    pub fn shrink<A: FrameAlloc>(&self, alloc: &mut A, old: u64, new: u64) -> u64 {
        if new >= old {
            return old;
        }
        let (Some(low), Some(high)) = (page_round_up(new), page_round_up(old)) else {
            panic!("shrink: size {old:#x} out of range");
        };
        if low < high {
            self.unmap(alloc, VirtualAddress::new(low), high - low, true);
        }
        new
    }

    /// Map one zeroed user page at address 0 holding `image`.
    ///
    /// # Panics
    /// If `image` does not fit below the page end.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the page or its tables cannot be allocated.
    pub fn load_initial<A: FrameAlloc>(&self, alloc: &mut A, image: &[u8]) -> Result<(), MapError> {
        assert!(
            image.len() < PAGE_SIZE as usize,
            "load_initial: image of {} bytes is more than a page",
            image.len()
        );
        self.populate(alloc, VirtualAddress::zero(), PageEntryBits::user_rwx(), image)
            .map(|_| ())
    }

    /// Drop the user bit from the page holding `va`, turning it into a guard page.
    ///
    /// # Panics
    /// If the page is not mapped.
    pub fn clear_user(&self, va: VirtualAddress) {
        let Some(slot) = self.leaf_slot(va) else {
            panic!("clear_user: {va} not mapped");
        };
        let bits = self.entry(slot).bits().with_user(false);
        self.set_entry(slot, PageTableEntry::from_bits(bits));
    }

    /// Release the user image `[0, size)` and then the tables themselves.
    ///
    /// # Panics
    /// If a page of the image is missing or a leaf outside it is still live.
    pub fn free_user<A: FrameAlloc>(self, alloc: &mut A, size: u64) {
        if size > 0 {
            let Some(end) = page_round_up(size) else {
                panic!("free_user: size {size:#x} out of range");
            };
            self.unmap(alloc, VirtualAddress::zero(), end, true);
        }
        self.destroy(alloc);
    }
}
