//! # Virtual Memory Support
//!
//! Sv39 page tables for a small RISC-V kernel.
//!
//! ## What you get
//! - An [`AddressSpace`] handle over one translation tree, with mapping,
//!   unmapping, translation, duplication, teardown and the user/kernel copy
//!   primitives.
//! - The Sv39 entry layout as a bitfield ([`PageEntryBits`]).
//! - A 4 KiB-aligned [`PageTable`] with typed indices.
//! - The two seams the tree needs from the rest of the kernel:
//!   [`FrameAlloc`] for frames and [`PhysMapper`] to touch their bytes.
//!
//! ## Sv39 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  Root | Middle|  Leaf | Offset |
//! ```
//!
//! ```text
//!  Root  →  Middle  →  Leaf  →  Physical Page
//!    │         │          └───► leaf entry (V + R/W/X) → maps 4 KiB
//!    │         └──────────────► pointer entry (V only)
//!    └────────────────────────► pointer entry (V only)
//! ```
//!
//! Each table holds 512 eight-byte entries. Only 4 KiB leaves are produced;
//! interior tables are never shared between address spaces.
//!
//! Addresses at or above [`MAX_VIRTUAL_ADDRESS`](kernel_info::memory::MAX_VIRTUAL_ADDRESS)
//! are rejected rather than sign-extended.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod error;
mod page_entry_bits;
pub mod page_table;
#[cfg(test)]
mod testing;

pub use crate::address_space::{AddressSpace, LeafSlot};
pub use crate::error::{CopyError, MapError, WalkError};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::{EntryKind, PageTable, PageTableEntry};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// Source of **physical** 4 KiB frames for page tables and user pages.
///
/// Returned frames **must** be 4 KiB aligned. Their contents are unspecified;
/// callers zero or fill them.
pub trait FrameAlloc {
    /// Allocate one frame. Returns `None` on out-of-memory.
    fn alloc_4k(&mut self) -> Option<PhysicalPage>;

    /// Drop one reference to `page`. The frame goes back to the pool once
    /// its last reference is gone.
    fn free_4k(&mut self, page: PhysicalPage);
}

/// Converts physical addresses to *temporarily* usable pointers in the current
/// virtual address space (identity map, fixed offset, or a test arena).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Reach physical memory at a constant offset: `va = pa + offset`.
///
/// An offset of zero is the identity map the kernel runs with. The offset is
/// applied with wrapping arithmetic, so a backing buffer *below* the
/// simulated physical base works as well.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OffsetPhysMapper {
    offset: u64,
}

impl OffsetPhysMapper {
    #[must_use]
    pub const fn new(offset: u64) -> Self {
        Self { offset }
    }

    /// Mapper that places physical address `phys_base` at the host pointer `base`.
    #[must_use]
    pub fn for_buffer(phys_base: PhysicalAddress, base: *const u8) -> Self {
        Self::new((base as u64).wrapping_sub(phys_base.as_u64()))
    }

    #[must_use]
    pub const fn offset(&self) -> u64 {
        self.offset
    }
}

impl PhysMapper for OffsetPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_u64().wrapping_add(self.offset) as *mut T;
        // SAFETY: Caller guarantees the translated pointer is valid for `T`.
        unsafe { &mut *va }
    }
}

/// The 4 KiB frame at `page`, as bytes.
///
/// # Safety
/// `page` must be a frame the caller owns, reachable through `mapper`.
#[inline]
pub(crate) unsafe fn frame_bytes<'a, M: PhysMapper>(
    mapper: &M,
    page: PhysicalPage,
) -> &'a mut [u8; info::PAGE_SIZE as usize] {
    unsafe { mapper.phys_to_mut(page.base()) }
}

/// Align `x` down to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_down;
/// assert_eq!(align_down(0,      4096), 0);
/// assert_eq!(align_down(4095,   4096), 0);
/// assert_eq!(align_down(8191,   4096), 4096);
/// assert_eq!(align_down(0x12345,   16), 0x12340);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u64, a: u64) -> u64 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// ### Preconditions
/// - `a` must be **non-zero** and a **power of two**.
/// - `x + (a - 1)` must **not overflow** `u64`.
///
/// ### Examples
/// ```rust
/// # use kernel_vmem::align_up;
/// assert_eq!(align_up(0,       4096), 0);
/// assert_eq!(align_up(1,       4096), 4096);
/// assert_eq!(align_up(4096,    4096), 4096);
/// assert_eq!(align_up(0x12345,   16), 0x12350);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u64, a: u64) -> u64 {
    (x + a - 1) & !(a - 1)
}
