//! Copies between kernel buffers and user virtual memory.
//!
//! Each copy proceeds one page fragment at a time: translate the page that
//! holds the current user address, then move at most the bytes left in that
//! page. User ranges are never dereferenced directly.

use crate::address_space::AddressSpace;
use crate::{CopyError, PageTableEntry, PhysMapper, frame_bytes};
use kernel_memory_addresses::VirtualAddress;

impl<M: PhysMapper> AddressSpace<'_, M> {
    /// Copy `src` to user memory at `dst`.
    ///
    /// Marks every touched page accessed and dirty.
    ///
    /// # Errors
    /// [`CopyError::Unmapped`] if a touched page has no user mapping. Fragments
    /// before the failing page have already been written.
    pub fn copy_out(&self, dst: VirtualAddress, src: &[u8]) -> Result<(), CopyError> {
        let mut va = dst;
        let mut rest = src;
        while !rest.is_empty() {
            let (page, offset) = va.split();
            let slot = self
                .user_leaf_slot(page.base())
                .ok_or(CopyError::Unmapped(page.base()))?;
            let entry = self.entry(slot).bits();
            let n = rest.len().min(offset.remaining() as usize);

            // SAFETY: the frame is mapped by a leaf of this tree.
            let frame = unsafe { frame_bytes(self.mapper, entry.physical_page()) };
            frame[offset.as_usize()..offset.as_usize() + n].copy_from_slice(&rest[..n]);
            self.set_entry(
                slot,
                PageTableEntry::from_bits(entry.with_accessed(true).with_dirty(true)),
            );

            rest = &rest[n..];
            va = page.add_pages(1).base();
        }
        Ok(())
    }

    /// Fill `dst` from user memory starting at `src`.
    ///
    /// # Errors
    /// [`CopyError::Unmapped`] if a touched page has no user mapping.
    pub fn copy_in(&self, dst: &mut [u8], src: VirtualAddress) -> Result<(), CopyError> {
        let mut va = src;
        let mut done = 0;
        while done < dst.len() {
            let (page, offset) = va.split();
            let slot = self
                .user_leaf_slot(page.base())
                .ok_or(CopyError::Unmapped(page.base()))?;
            let n = (dst.len() - done).min(offset.remaining() as usize);

            let leaf = self.entry(slot).bits();
            // SAFETY: the frame is mapped by a leaf of this tree.
            let frame = unsafe { frame_bytes(self.mapper, leaf.physical_page()) };
            dst[done..done + n].copy_from_slice(&frame[offset.as_usize()..offset.as_usize() + n]);

            done += n;
            va = page.add_pages(1).base();
        }
        Ok(())
    }

    /// Copy a NUL-terminated string from user memory at `src` into `dst`.
    ///
    /// At most `dst.len()` bytes are consumed, terminator included. On success
    /// `dst` holds the string plus its terminator and the string length
    /// (without the terminator) is returned.
    ///
    /// # Errors
    /// - [`CopyError::Unmapped`] if a touched page has no user mapping.
    /// - [`CopyError::Unterminated`] if `dst.len()` bytes contain no NUL.
    pub fn copy_in_str(&self, dst: &mut [u8], src: VirtualAddress) -> Result<usize, CopyError> {
        let mut va = src;
        let mut done = 0;
        while done < dst.len() {
            let (page, offset) = va.split();
            let slot = self
                .user_leaf_slot(page.base())
                .ok_or(CopyError::Unmapped(page.base()))?;
            let n = (dst.len() - done).min(offset.remaining() as usize);

            let leaf = self.entry(slot).bits();
            // SAFETY: the frame is mapped by a leaf of this tree.
            let frame = unsafe { frame_bytes(self.mapper, leaf.physical_page()) };
            let chunk = &frame[offset.as_usize()..offset.as_usize() + n];
            if let Some(nul) = chunk.iter().position(|&b| b == 0) {
                dst[done..=done + nul].copy_from_slice(&chunk[..=nul]);
                return Ok(done + nul);
            }
            dst[done..done + n].copy_from_slice(chunk);

            done += n;
            va = page.add_pages(1).base();
        }
        Err(CopyError::Unterminated)
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::TestRam;
    use crate::{AddressSpace, CopyError, FrameAlloc, PageEntryBits};
    use kernel_info::memory::PAGE_SIZE;
    use kernel_memory_addresses::VirtualAddress;

    const BASE: VirtualAddress = VirtualAddress::new(0x1000_0000);

    /// Map `pages` fresh user pages at `BASE`.
    fn user_pages(
        ram: &mut TestRam,
        space: &AddressSpace<'_, crate::OffsetPhysMapper>,
        pages: u64,
    ) {
        for i in 0..pages {
            let frame = ram.alloc_4k().unwrap();
            space
                .map(ram, BASE + i * PAGE_SIZE, frame.base(), PAGE_SIZE, PageEntryBits::user_rw())
                .unwrap();
        }
    }

    fn pattern(n: usize) -> Vec<u8> {
        (0..n).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn round_trips_across_page_boundaries() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        user_pages(&mut ram, &space, 4);

        let start = BASE + (PAGE_SIZE - 5);
        for n in [1, 5, 6, 100, 4095, 4096, 4097, 2 * 4096 + 17] {
            let data = pattern(n);
            space.copy_out(start, &data).unwrap();
            let mut back = vec![0u8; n];
            space.copy_in(&mut back, start).unwrap();
            assert_eq!(back, data, "n = {n}");
        }
    }

    #[test]
    fn copy_out_marks_pages_dirty() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        user_pages(&mut ram, &space, 3);

        space.copy_out(BASE + PAGE_SIZE + 10, &[1, 2, 3]).unwrap();
        assert!(!space.leaf(BASE).unwrap().dirty());
        let touched = space.leaf(BASE + PAGE_SIZE).unwrap();
        assert!(touched.dirty() && touched.accessed());
        assert!(!space.leaf(BASE + 2 * PAGE_SIZE).unwrap().dirty());
    }

    #[test]
    fn unmapped_pages_fail() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        user_pages(&mut ram, &space, 1);

        let tail = BASE + PAGE_SIZE;
        assert_eq!(
            space.copy_out(BASE + (PAGE_SIZE - 2), &[0; 4]),
            Err(CopyError::Unmapped(tail))
        );
        let mut buf = [0u8; 4];
        assert_eq!(space.copy_in(&mut buf, tail), Err(CopyError::Unmapped(tail)));
    }

    #[test]
    fn kernel_pages_are_not_user_visible() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        let frame = ram.alloc_4k().unwrap();
        space
            .map(&mut ram, BASE, frame.base(), PAGE_SIZE, PageEntryBits::kernel_rw())
            .unwrap();
        assert_eq!(space.copy_out(BASE, &[1]), Err(CopyError::Unmapped(BASE)));
    }

    #[test]
    fn strings_stop_at_the_terminator() {
        let mut ram = TestRam::with_frames(16);
        let mapper = ram.mapper;
        let space = AddressSpace::create(&mapper, &mut ram).unwrap();
        user_pages(&mut ram, &space, 2);

        // Crosses into the second page.
        let at = BASE + (PAGE_SIZE - 3);
        space.copy_out(at, b"hello\0world").unwrap();

        let mut buf = [0xFFu8; 32];
        assert_eq!(space.copy_in_str(&mut buf, at), Ok(5));
        assert_eq!(&buf[..6], b"hello\0");
        assert_eq!(buf[6], 0xFF);

        let mut exact = [0u8; 6];
        assert_eq!(space.copy_in_str(&mut exact, at), Ok(5));

        let mut short = [0u8; 5];
        assert_eq!(space.copy_in_str(&mut short, at), Err(CopyError::Unterminated));

        let mut empty = [0u8; 0];
        assert_eq!(space.copy_in_str(&mut empty, at), Err(CopyError::Unterminated));
    }
}
