//! # Kernel Physical Memory Allocation
//!
//! This crate owns the kernel's physical frames. Everything that needs RAM,
//! from page tables to user pages, gets it from here.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Page tables / address spaces             │
//! │    • kernel-vmem `AddressSpace`                     │
//! │    • consume frames through `FrameAlloc`            │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ CpuFrameAlloc
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Physical Frame Allocator                  │
//! │    • one free list per CPU, stealing when empty     │
//! │    • per-frame reference counts                     │
//! │    • index-linked descriptors, no intrusive links   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │ PhysMapper
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Direct map                             │
//! │    • physical address + DIRECT_MAP_OFFSET           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Physical Frame Allocator ([`frame_alloc`])
//!
//! * **Per-CPU lists**: a CPU allocates from and frees to its own list; a
//!   lock is held only for one push or pop.
//! * **Stealing**: an empty list borrows from the others in CPU order, never
//!   holding two list locks at once.
//! * **Shared frames**: [`add_ref`](FrameAllocator::add_ref) and
//!   [`dec_ref`](FrameAllocator::dec_ref) track extra owners; the last
//!   reference returns the frame.
//! * **Poisoning**: fresh frames are filled with `ALLOC_POISON`, released
//!   ones with `FREE_POISON`.
//!
//! ### Physical Mapper ([`phys_mapper`])
//!
//! [`DirectMapPhysMapper`] turns a physical address into a reference through
//! the kernel's direct map.
//!
//! ## Registry
//!
//! The kernel has exactly one allocator. [`init`] builds it from the boot
//! memory description and parks it in a static cell; [`global`] hands it out
//! afterwards. It is never moved once published.
//!
//! ```rust,no_run
//! use kernel_alloc::{global, init};
//! use kernel_info::boot::BootMemory;
//! use kernel_memory_addresses::PhysicalAddress;
//! use kernel_vmem::FrameAlloc;
//!
//! let boot = BootMemory::up_to_phys_top(PhysicalAddress::new(0x8040_0000), 4);
//! let frames = unsafe { init(&boot) }.unwrap();
//! let mut on_cpu0 = frames.on_cpu(0);
//! if let Some(frame) = on_cpu0.alloc_4k() {
//!     on_cpu0.free_4k(frame);
//! }
//! assert!(global().is_some());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod frame_alloc;
pub mod phys_mapper;

pub use crate::frame_alloc::{CpuFrameAlloc, FrameAllocator, InitError};
pub use crate::phys_mapper::DirectMapPhysMapper;

use kernel_info::boot::BootMemory;
use kernel_sync::SyncOnceCell;

/// The kernel's frame allocator.
pub type KernelFrames = FrameAllocator<DirectMapPhysMapper>;

static FRAMES: SyncOnceCell<KernelFrames> = SyncOnceCell::new();

/// Build the kernel's frame allocator from `boot` and publish it.
///
/// The registry is claimed before the range is touched, so a losing or late
/// caller never rewrites the descriptors of the published allocator. A failed
/// build leaves the registry empty.
///
/// # Safety
/// The boot range must be unused RAM, covered by the direct map, for the rest
/// of the kernel's life.
///
/// # Errors
/// - [`InitError::AlreadyInitialized`] if another call has claimed the registry.
/// - Any error of [`FrameAllocator::new`].
pub unsafe fn init(boot: &BootMemory) -> Result<&'static KernelFrames, InitError> {
    FRAMES
        // SAFETY: forwarded from the caller.
        .try_init(|| unsafe { FrameAllocator::new(DirectMapPhysMapper, boot) })
        .unwrap_or(Err(InitError::AlreadyInitialized))
}

/// The published allocator, if [`init`] has run.
#[must_use]
pub fn global() -> Option<&'static KernelFrames> {
    FRAMES.get()
}
