//! # Memory Address Types
//!
//! Strongly typed wrappers for the addresses the memory-management core juggles.
//! Every page in this system is 4 KiB, so the types are not generic over a page
//! size; huge pages are not supported.
//!
//! ## Types
//!
//! * [`MemoryAddress`]: principal raw address, shared representation of both kinds.
//! * [`VirtualAddress`] / [`PhysicalAddress`]: address *kinds*, so a virtual
//!   address can never be passed where a physical one is expected.
//! * [`VirtualPage`] / [`PhysicalPage`]: page-aligned bases. A [`PhysicalPage`]
//!   is what the frame allocator hands out.
//! * [`PageOffset`]: the byte offset inside a page (`0..4096`).
//!
//! ## Splitting and joining
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x0000_0020_0000_1234);
//! let (page, offset) = va.split();
//! assert_eq!(page.base().as_u64(), 0x0000_0020_0000_1000);
//! assert_eq!(offset.as_u64(), 0x234);
//! assert_eq!(page.join(offset), va);
//! ```
//!
//! Sv39 stores frames as physical page numbers (PPN); [`PhysicalPage::frame_number`]
//! and [`PhysicalPage::from_frame_number`] convert between the two forms.

#![cfg_attr(not(any(test, doctest)), no_std)]

mod memory_address;
mod page_offset;
mod physical_address;
mod physical_page;
mod virtual_address;
mod virtual_page;

pub use memory_address::MemoryAddress;
pub use page_offset::PageOffset;
pub use physical_address::PhysicalAddress;
pub use physical_page::PhysicalPage;
pub use virtual_address::VirtualAddress;
pub use virtual_page::VirtualPage;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u64 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Round `value` down to a page boundary.
#[inline]
#[must_use]
pub const fn page_round_down(value: u64) -> u64 {
    value & !(PAGE_SIZE - 1)
}

/// Round `value` up to a page boundary, or `None` if that overflows `u64`.
#[inline]
#[must_use]
pub const fn page_round_up(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_SIZE - 1) {
        Some(v) => Some(page_round_down(v)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounding() {
        assert_eq!(page_round_down(0), 0);
        assert_eq!(page_round_down(4095), 0);
        assert_eq!(page_round_down(4096), 4096);
        assert_eq!(page_round_up(0), Some(0));
        assert_eq!(page_round_up(1), Some(4096));
        assert_eq!(page_round_up(4096), Some(4096));
        assert_eq!(page_round_up(4097), Some(8192));
        assert_eq!(page_round_up(u64::MAX), None);
    }

    #[test]
    fn split_and_join_virtual() {
        let va = VirtualAddress::new(0x3_FFFF_F123);
        let (page, off) = va.split();
        assert_eq!(page.base().as_u64(), 0x3_FFFF_F000);
        assert_eq!(off.as_u64(), 0x123);
        assert_eq!(page.join(off), va);
    }

    #[test]
    fn frame_numbers_round_trip() {
        let pp = PhysicalAddress::new(0x8020_3456).page();
        assert_eq!(pp.base().as_u64(), 0x8020_3000);
        assert_eq!(pp.frame_number(), 0x80203);
        assert_eq!(PhysicalPage::from_frame_number(0x80203), pp);
    }

    #[test]
    fn checked_arithmetic() {
        let va = VirtualAddress::new(u64::MAX - 10);
        assert!(va.checked_add(11).is_none());
        assert_eq!(va.checked_add(10), Some(VirtualAddress::new(u64::MAX)));
        assert!(VirtualAddress::new(u64::MAX).align_up().is_none());
        assert_eq!(
            VirtualAddress::new(0x1001).align_up(),
            Some(VirtualAddress::new(0x2000))
        );
    }

    #[test]
    fn page_stepping() {
        let vp = VirtualAddress::new(0x5000).page();
        assert_eq!(vp.add_pages(3).base().as_u64(), 0x8000);
        assert_eq!(vp.pages_until(VirtualAddress::new(0x8000).page()), 3);
        assert!(VirtualAddress::new(0x5000).is_page_aligned());
        assert!(!VirtualAddress::new(0x5001).is_page_aligned());
    }

    #[test]
    fn display_is_hex() {
        let pa = PhysicalAddress::new(0x8000_0000);
        assert_eq!(format!("{pa}"), "0x0000000080000000");
        assert_eq!(format!("{pa:?}"), "PA(0x0000000080000000)");
    }
}
