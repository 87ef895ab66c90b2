//! # Kernel Configuration and Memory Layout
//!
//! This crate is the single source of truth for the constants the memory
//! subsystem is built around, plus the small description of usable RAM that
//! early boot hands to the frame allocator.
//!
//! ## Virtual Memory Architecture
//!
//! Every process owns an Sv39 address space. Only the lower half of the
//! 39-bit range is used, so addresses never need sign extension:
//!
//! ```text
//! 0x00_0000_0000 ┌─────────────────────────────────┐
//!                │  Program image, data, heap      │  grows upward
//!                │                                 │
//! MMAP_FLOOR     ├ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ─ ┤ 0x20_0000_0000
//!                │                                 │
//!                │  Memory-mapped file regions     │  carved downward
//! MMAP_TOP       ├─────────────────────────────────┤
//! TRAPFRAME      │  Trap frame                     │
//! TRAMPOLINE     │  Trampoline                     │
//! MAX_VIRTUAL_   └─────────────────────────────────┘ 0x40_0000_0000
//! ADDRESS
//! ```
//!
//! ## Physical Memory Layout
//!
//! ```text
//! KERNEL_BASE  ┌─────────────────────────────────┐ 0x8000_0000
//!              │  Kernel image                   │
//!              ├─────────────────────────────────┤ first_usable
//!              │  Frames managed by the          │
//!              │  per-CPU frame allocator        │
//! PHYS_TOP     └─────────────────────────────────┘ 0x8800_0000
//! ```
//!
//! Physical memory is identity-mapped in the kernel, so
//! [`DIRECT_MAP_OFFSET`](memory::DIRECT_MAP_OFFSET) is zero.
//!
//! ## Boot configuration
//!
//! ```rust
//! use kernel_info::boot::BootMemory;
//! use kernel_memory_addresses::PhysicalAddress;
//!
//! let boot = BootMemory::up_to_phys_top(PhysicalAddress::new(0x8021_0000), 4);
//! assert!(boot.has_valid_cpus());
//! assert!(boot.frames().is_some());
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
