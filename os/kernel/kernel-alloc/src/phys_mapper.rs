//! # Direct-map `PhysMapper`
//!
//! The kernel reaches physical memory through a direct map: every physical
//! address `pa` is visible at `pa + DIRECT_MAP_OFFSET`. On this machine the
//! offset is zero, the kernel runs identity-mapped.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::DirectMapPhysMapper;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::{PageTable, PhysMapper};
//!
//! let mapper = DirectMapPhysMapper;
//! unsafe {
//!     let table: &mut PageTable = mapper.phys_to_mut(PhysicalAddress::new(0x8020_0000));
//!     table.zero();
//! }
//! ```

use kernel_info::memory::DIRECT_MAP_OFFSET;
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

/// [`PhysMapper`] for the kernel's direct map of physical memory.
///
/// # Safety
/// - The direct map must cover the referenced physical range.
/// - The returned reference must only be used for RAM the caller owns.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectMapPhysMapper;

impl PhysMapper for DirectMapPhysMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        let va = pa.as_u64().wrapping_add(DIRECT_MAP_OFFSET) as *mut T;
        // SAFETY: Caller must ensure the physical address is valid and direct-mapped.
        unsafe { &mut *va }
    }
}
