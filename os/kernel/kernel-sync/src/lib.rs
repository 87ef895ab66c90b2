//! # Kernel synchronization primitives
//!
//! * [`SpinLock`]: a named busy-wait lock with an RAII guard. The frame
//!   allocator keeps one per CPU free list.
//! * [`SyncOnceCell`]: a set-once cell for boot-time registries.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;
mod sync_once_cell;

pub use spin_lock::{SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
