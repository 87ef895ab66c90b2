//! # Kernel Memory Mapping
//!
//! File-backed memory regions of user processes, and the per-process bundle
//! of page table, image size and regions.
//!
//! ## Overview
//!
//! - [`VmaTable`] places regions in the mmap window, shrinks and splits them
//!   on partial unmaps, clones them for `fork` and resolves page faults
//!   inside them.
//! - [`VmaRegion`] is one range `[start, end)` with its [`Protection`],
//!   [`Sharing`] mode, backing file and file offset.
//! - [`BackingFile`] is what the file layer has to provide: readability and
//!   writability of the open file, its length, and positioned reads/writes.
//! - [`UserAddressSpace`] ties a process's [`AddressSpace`](kernel_vmem::AddressSpace),
//!   its image size and its [`VmaTable`] together.
//!
//! ## Example
//!
//! ```rust
//! use kernel_mmap::{BackingFile, FileError, Protection, Sharing, VmaTable};
//! use std::sync::Arc;
//!
//! struct Zeros;
//!
//! impl BackingFile for Zeros {
//!     fn readable(&self) -> bool { true }
//!     fn writable(&self) -> bool { false }
//!     fn len(&self) -> u64 { 1 << 20 }
//!     fn read_at(&self, buf: &mut [u8], _: u64) -> Result<usize, FileError> {
//!         buf.fill(0);
//!         Ok(buf.len())
//!     }
//!     fn write_at(&self, _: &[u8], _: u64) -> Result<usize, FileError> {
//!         Err(FileError::NotWritable)
//!     }
//! }
//!
//! let file = Arc::new(Zeros);
//! let mut regions = VmaTable::default();
//! let at = regions
//!     .map_region(8192, Protection::read_only(), Sharing::Private, &file, 0)
//!     .unwrap();
//! assert_eq!(regions.lookup(at).map(|r| r.len()), Some(8192));
//! assert!(regions
//!     .map_region(8192, Protection::read_write(), Sharing::Shared, &file, 0)
//!     .is_err());
//! ```
//!
//! ## Concurrency
//!
//! Nothing here locks. A process's table and its address space have a single
//! mutator at a time; the frame allocator behind [`FrameAlloc`](kernel_vmem::FrameAlloc)
//! does its own locking.

#![cfg_attr(not(any(test, doctest)), no_std)]

extern crate alloc;

mod file;
mod process;
mod region;
mod table;

pub use crate::file::{BackingFile, FileError};
pub use crate::process::UserAddressSpace;
pub use crate::region::{Protection, Sharing, VmaRegion};
pub use crate::table::{VmaError, VmaTable};
