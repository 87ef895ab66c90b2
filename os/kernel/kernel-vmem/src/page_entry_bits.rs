use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// A single 64-bit Sv39 page table entry in its raw bitfield form.
///
/// All three levels share one layout. Whether an entry is a pointer to the
/// next table or a leaf is encoded in the permission bits: a valid entry
/// with `R`, `W` and `X` all clear points to a child table, anything else
/// maps a page.
///
/// ### Bit layout
///
/// | Bits   | Name  | Meaning |
/// |--------|-------|---------|
/// | 0      | `V`   | Valid |
/// | 1      | `R`   | Readable |
/// | 2      | `W`   | Writable |
/// | 3      | `X`   | Executable |
/// | 4      | `U`   | Accessible from user mode |
/// | 5      | `G`   | Global mapping |
/// | 6      | `A`   | Accessed |
/// | 7      | `D`   | Dirty |
/// | 8–9    | `RSW` | Reserved for software |
/// | 10–53  | `PPN` | Physical page number |
/// | 54–63  |       | Reserved, must be zero |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::PhysicalPage;
/// # use kernel_vmem::PageEntryBits;
/// let page = PhysicalPage::from_frame_number(0x80123);
/// let e = PageEntryBits::user_rw().with_valid(true).with_physical_page(page);
/// assert!(e.is_leaf());
/// assert_eq!(e.physical_page(), page);
/// ```
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageEntryBits {
    /// Valid (V, bit 0). Clear means every other bit is ignored.
    pub valid: bool,

    /// Readable (R, bit 1).
    pub readable: bool,

    /// Writable (W, bit 2). Hardware requires `R` whenever `W` is set.
    pub writable: bool,

    /// Executable (X, bit 3).
    pub executable: bool,

    /// User (U, bit 4). User mode may only touch pages with this set.
    pub user: bool,

    /// Global (G, bit 5). Present in every address space.
    pub global: bool,

    /// Accessed (A, bit 6). Set on the first access through this entry.
    pub accessed: bool,

    /// Dirty (D, bit 7) — **leaf only**. Set on the first write.
    pub dirty: bool,

    /// Reserved for software (RSW, bits 8..=9).
    #[bits(2)]
    pub software: u8,

    /// Physical page number (bits 10..=53).
    #[bits(44)]
    ppn: u64,

    #[bits(10)]
    __: u16,
}

impl PageEntryBits {
    #[inline]
    #[must_use]
    pub const fn physical_page(&self) -> PhysicalPage {
        PhysicalPage::from_frame_number(self.ppn())
    }

    #[inline]
    pub const fn set_physical_page(&mut self, page: PhysicalPage) {
        self.set_ppn(page.frame_number());
    }

    #[inline]
    #[must_use]
    pub const fn with_physical_page(mut self, page: PhysicalPage) -> Self {
        self.set_physical_page(page);
        self
    }

    /// Valid and at least one of `R`/`W`/`X` set.
    #[inline]
    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        self.valid() && (self.readable() || self.writable() || self.executable())
    }

    /// Only the permission bits (`R`, `W`, `X`, `U`, `G`) of this entry.
    #[inline]
    #[must_use]
    pub const fn permissions(&self) -> Self {
        Self::new()
            .with_readable(self.readable())
            .with_writable(self.writable())
            .with_executable(self.executable())
            .with_user(self.user())
            .with_global(self.global())
    }

    /// Kernel read/write data.
    #[inline]
    #[must_use]
    pub const fn kernel_rw() -> Self {
        Self::new().with_readable(true).with_writable(true)
    }

    /// Kernel text.
    #[inline]
    #[must_use]
    pub const fn kernel_rx() -> Self {
        Self::new().with_readable(true).with_executable(true)
    }

    /// User read/write data.
    #[inline]
    #[must_use]
    pub const fn user_rw() -> Self {
        Self::kernel_rw().with_user(true)
    }

    /// User pages that may hold code and data alike (heap growth, first process).
    #[inline]
    #[must_use]
    pub const fn user_rwx() -> Self {
        Self::user_rw().with_executable(true)
    }
}
