use crate::file::BackingFile;
use crate::region::{Protection, Sharing};
use crate::table::{VmaError, VmaTable};
use alloc::sync::Arc;
use kernel_info::memory::PAGE_SIZE;
use kernel_memory_addresses::{PhysicalPage, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, MapError, PhysMapper};
use log::debug;

/// Everything a process owns of its memory: the page table, the size of its
/// image `[0, size)` and its mapped regions.
///
/// Not dropped implicitly; hand it to [`teardown`](Self::teardown) when the
/// process exits.
pub struct UserAddressSpace<'m, M: PhysMapper, F: ?Sized> {
    pages: AddressSpace<'m, M>,
    size: u64,
    regions: VmaTable<F>,
}

impl<'m, M: PhysMapper, F: BackingFile + ?Sized> UserAddressSpace<'m, M, F> {
    /// An empty address space with a fresh root table.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the root table cannot be allocated.
    pub fn create<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, MapError> {
        Ok(Self {
            pages: AddressSpace::create(mapper, alloc)?,
            size: 0,
            regions: VmaTable::default(),
        })
    }

    #[inline]
    pub const fn pages(&self) -> &AddressSpace<'m, M> {
        &self.pages
    }

    /// Bytes of the process image.
    #[inline]
    pub const fn size(&self) -> u64 {
        self.size
    }

    #[inline]
    pub const fn regions(&self) -> &VmaTable<F> {
        &self.regions
    }

    /// Map the first process's image at address 0.
    ///
    /// # Panics
    /// If the image is already loaded or does not fit a page.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the page cannot be allocated.
    pub fn load_initial<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        image: &[u8],
    ) -> Result<(), MapError> {
        assert_eq!(self.size, 0, "load_initial: image already loaded");
        self.pages.load_initial(alloc, image)?;
        self.size = PAGE_SIZE;
        Ok(())
    }

    /// A child copy: every image page copied, every region shared with the
    /// same file and offset.
    ///
    /// Region pages are not copied; the child reads them in again on first
    /// touch.
    ///
    /// # Errors
    /// [`MapError::OutOfMemory`] if the copy cannot be completed. Nothing of
    /// the child survives a failure.
    pub fn fork<A: FrameAlloc>(&self, alloc: &mut A) -> Result<Self, MapError> {
        let child = AddressSpace::create(self.pages.mapper(), alloc)?;
        if let Err(err) = self.pages.duplicate_into(&child, alloc, self.size) {
            child.destroy(alloc);
            return Err(err);
        }
        let mut regions = VmaTable::new(self.regions.top(), self.regions.floor());
        regions.clone_from(&self.regions);
        debug!(
            "forked {} into {}: {:#x} bytes, {} regions",
            self.pages.root_page(),
            child.root_page(),
            self.size,
            regions.len()
        );
        Ok(Self {
            pages: child,
            size: self.size,
            regions,
        })
    }

    /// Grow the image by `bytes`, returning the new size.
    ///
    /// # Errors
    /// - [`VmaError::OutOfAddressSpace`] if the image would reach the mmap window.
    /// - [`VmaError::Map`] if pages cannot be added; the size is unchanged.
    pub fn grow<A: FrameAlloc>(&mut self, alloc: &mut A, bytes: u64) -> Result<u64, VmaError> {
        let new = self
            .size
            .checked_add(bytes)
            .filter(|&new| new <= self.regions.floor().as_u64())
            .ok_or(VmaError::OutOfAddressSpace)?;
        self.size = self.pages.grow(alloc, self.size, new)?;
        Ok(self.size)
    }

    /// Shrink the image by up to `bytes`, returning the new size.
    pub fn shrink<A: FrameAlloc>(&mut self, alloc: &mut A, bytes: u64) -> u64 {
        self.size = self
            .pages
            .shrink(alloc, self.size, self.size.saturating_sub(bytes));
        self.size
    }

    /// Map `len` bytes of `file` from `offset`; see [`VmaTable::map_region`].
    ///
    /// # Errors
    /// As [`VmaTable::map_region`].
    pub fn mmap(
        &mut self,
        len: u64,
        protection: Protection,
        sharing: Sharing,
        file: &Arc<F>,
        offset: u64,
    ) -> Result<VirtualAddress, VmaError> {
        self.regions
            .map_region(len, protection, sharing, file, offset)
    }

    /// Unmap `[addr, addr + len)`; see [`VmaTable::unmap_region`].
    ///
    /// # Errors
    /// As [`VmaTable::unmap_region`].
    pub fn munmap<A: FrameAlloc>(
        &mut self,
        alloc: &mut A,
        addr: VirtualAddress,
        len: u64,
    ) -> Result<u64, VmaError> {
        self.regions.unmap_region(&self.pages, alloc, addr, len)
    }

    /// Resolve a page fault at `va` inside a mapped region.
    ///
    /// # Errors
    /// As [`VmaTable::resolve_fault`]; the caller kills the faulting access.
    pub fn handle_fault<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
    ) -> Result<PhysicalPage, VmaError> {
        self.regions.resolve_fault(&self.pages, alloc, va)
    }

    /// Release everything: regions (with write-back), image pages and tables.
    pub fn teardown<A: FrameAlloc>(self, alloc: &mut A) {
        let Self {
            pages,
            size,
            mut regions,
        } = self;
        let root = pages.root_page();
        regions.unmap_all(&pages, alloc);
        pages.free_user(alloc, size);
        debug!("tore down address space {root}");
    }
}
