use crate::address_space::AddressSpace;
use crate::{FrameAlloc, MapError, PhysMapper, frame_bytes};
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{VirtualAddress, page_round_up};
use log::debug;

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Eagerly copy the user image `[0, size)` into `child`.
    ///
    /// Every page gets a fresh frame holding a copy of the original bytes and
    /// is mapped in `child` with the same permissions. On failure every page
    /// already copied is unmapped from `child` and its frame released, so the
    /// child is left without user leaves.
    ///
    /// # Panics
    /// If a page below `size` is not mapped in `self`.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if a frame or table could not be allocated.
    pub fn duplicate_into<A: FrameAlloc>(
        &self,
        child: &AddressSpace<'_, M>,
        alloc: &mut A,
        size: u64,
    ) -> Result<(), MapError> {
        let pages = page_round_up(size).ok_or(MapError::OutOfRange(VirtualAddress::new(size)))?
            / PAGE_SIZE;

        for i in 0..pages {
            let va = VirtualAddress::new(i * PAGE_SIZE);
            let Some(entry) = self.leaf(va) else {
                panic!("duplicate: {va} not mapped");
            };

            let Some(frame) = alloc.alloc_4k() else {
                child.unwind_copy(alloc, i);
                return Err(MapError::OutOfMemory);
            };
            // SAFETY: `frame` is fresh and the source is mapped by a leaf; they differ.
            unsafe {
                frame_bytes(child.mapper, frame)
                    .copy_from_slice(&frame_bytes(self.mapper, entry.physical_page())[..]);
            }

            if let Err(err) = child.map(alloc, va, frame.base(), PAGE_SIZE, entry.permissions()) {
                alloc.free_4k(frame);
                child.unwind_copy(alloc, i);
                return Err(err);
            }
        }

        debug!(
            "duplicated {pages} pages from {} into {}",
            self.root, child.root
        );
        Ok(())
    }

    /// Drop the first `pages` user pages of a partial copy.
    fn unwind_copy<A: FrameAlloc>(&self, alloc: &mut A, pages: u64) {
        if pages > 0 {
            self.unmap(alloc, VirtualAddress::zero(), pages * PAGE_SIZE, true);
        }
    }
}
