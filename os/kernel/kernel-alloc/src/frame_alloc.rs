//! # Per-CPU Physical Frame Allocator
//!
//! Hands out 4 KiB frames from one boot-time physical range.
//!
//! ## Layout
//!
//! ```text
//! first_usable                                             past_last
//! ┌──────────────────┬──────────────────────────────────────────┐
//! │ descriptor table │ pool frames                              │
//! │ 8 bytes / frame  │ cpu 0 chunk │ cpu 1 chunk │ ... │ cpu n-1 │
//! └──────────────────┴──────────────────────────────────────────┘
//! ```
//!
//! The first frames of the range hold one [`FrameDescriptor`] per pool frame.
//! Each CPU owns a [`FreeList`] threaded through the descriptors by index,
//! so free frames never carry link data in their own bytes.
//!
//! ## Locking
//!
//! - A CPU's lock guards only that CPU's list and is held for a single push
//!   or pop.
//! - [`FrameAllocator::alloc`] tries the caller's list first and then steals
//!   from the other CPUs in index order. The caller's lock is always dropped
//!   before a remote one is taken; no path holds two list locks.
//! - Reference counts live in the descriptors. The transition from one
//!   reference to none happens under the releasing CPU's lock, right after the
//!   push, so any frame observed with count 0 is already on a free list.

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, Ordering};
use kernel_info::boot::BootMemory;
use kernel_info::memory::{ALLOC_POISON, FREE_POISON, MAX_CPUS, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};
use kernel_sync::SpinLock;
use kernel_vmem::{FrameAlloc, PhysMapper};
use log::{info, trace, warn};

/// End-of-list marker for descriptor links.
const NONE: u32 = u32::MAX;

/// Bytes of descriptor table spent per frame of the managed range.
const DESCRIPTOR_SIZE: u64 = size_of::<FrameDescriptor>() as u64;

/// Why the allocator could not take over the boot memory range.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("boot memory range holds no frames besides the descriptor table")]
    EmptyRange,
    #[error("at least one cpu is required")]
    NoCpus,
    #[error("{0} cpus requested, at most {max} supported", max = MAX_CPUS)]
    TooManyCpus(usize),
    #[error("{0} frames exceed the descriptor index range")]
    TooManyFrames(u64),
    #[error("the frame allocator is already initialized")]
    AlreadyInitialized,
}

/// Side-table entry of one pool frame.
#[repr(C)]
#[derive(Debug)]
pub struct FrameDescriptor {
    /// Index of the next free frame on the same list, or [`NONE`].
    next_free: AtomicU32,
    /// Live references; 0 while the frame is free.
    refcount: AtomicU32,
}

impl FrameDescriptor {
    const fn free() -> Self {
        Self {
            next_free: AtomicU32::new(NONE),
            refcount: AtomicU32::new(0),
        }
    }
}

/// One CPU's free frames, linked through the descriptor table.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FreeList {
    head: u32,
    len: u32,
}

impl FreeList {
    const EMPTY: Self = Self { head: NONE, len: 0 };

    #[must_use]
    pub const fn len(&self) -> u32 {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head == NONE
    }

    fn push(&mut self, descriptors: &[FrameDescriptor], index: u32) {
        descriptors[index as usize]
            .next_free
            .store(self.head, Ordering::Relaxed);
        self.head = index;
        self.len += 1;
    }

    /// Pop the head and hand it out with one reference.
    fn pop(&mut self, descriptors: &[FrameDescriptor]) -> Option<u32> {
        if self.is_empty() {
            return None;
        }
        let index = self.head;
        let desc = &descriptors[index as usize];
        self.head = desc.next_free.swap(NONE, Ordering::Relaxed);
        self.len -= 1;
        let prev = desc.refcount.swap(1, Ordering::AcqRel);
        debug_assert_eq!(prev, 0, "frame {index} on a free list with references");
        Some(index)
    }
}

/// Physical frame allocator with one free list per CPU.
pub struct FrameAllocator<M: PhysMapper> {
    mapper: M,
    descriptors: NonNull<FrameDescriptor>,
    /// First frame of the pool, right after the descriptor table.
    first: PhysicalPage,
    frames: u32,
    cpus: usize,
    lists: [SpinLock<FreeList>; MAX_CPUS],
}

// SAFETY: the descriptor table is only touched through atomics or under a list lock.
unsafe impl<M: PhysMapper + Send> Send for FrameAllocator<M> {}
// SAFETY: as above; frame bytes are only written by the CPU that owns the frame.
unsafe impl<M: PhysMapper + Sync> Sync for FrameAllocator<M> {}

impl<M: PhysMapper> FrameAllocator<M> {
    /// Take over the frames described by `boot`.
    ///
    /// The descriptor table is carved from the start of the range and the
    /// remaining pool is split into `boot.cpus` contiguous chunks: CPU *k* of
    /// *c* gets pool frames `[k*n/c, (k+1)*n/c)`.
    ///
    /// # Safety
    /// The whole range must be RAM that nothing else uses, reachable through
    /// `mapper` for as long as the allocator lives.
    ///
    /// # Errors
    /// - [`InitError::NoCpus`] / [`InitError::TooManyCpus`] for a bad CPU count.
    /// - [`InitError::EmptyRange`] if no pool frame is left.
    /// - [`InitError::TooManyFrames`] if the pool cannot be indexed by `u32`.
    pub unsafe fn new(mapper: M, boot: &BootMemory) -> Result<Self, InitError> {
        if boot.cpus == 0 {
            return Err(InitError::NoCpus);
        }
        if !boot.has_valid_cpus() {
            return Err(InitError::TooManyCpus(boot.cpus));
        }
        let (start, count) = boot.frames().ok_or(InitError::EmptyRange)?;
        let table_frames = (count * DESCRIPTOR_SIZE).div_ceil(PAGE_SIZE);
        if count <= table_frames {
            return Err(InitError::EmptyRange);
        }
        let pool = count - table_frames;
        let frames = u32::try_from(pool)
            .ok()
            .filter(|&n| n < NONE)
            .ok_or(InitError::TooManyFrames(pool))?;

        // SAFETY: the table frames belong to us; the caller vouches for the mapping.
        let descriptors = NonNull::from(unsafe {
            mapper.phys_to_mut::<FrameDescriptor>(start.base())
        });
        for i in 0..frames as usize {
            // SAFETY: `table_frames` frames hold at least `frames` descriptors.
            unsafe { descriptors.add(i).write(FrameDescriptor::free()) };
        }

        let cpus = boot.cpus;
        let table = {
            // SAFETY: initialized just above.
            unsafe { core::slice::from_raw_parts(descriptors.as_ptr(), frames as usize) }
        };
        let lists = core::array::from_fn(|cpu| {
            let mut list = FreeList::EMPTY;
            if cpu < cpus {
                let (lo, hi) = chunk(frames, cpus, cpu);
                // Lowest index ends up at the head.
                for index in (lo..hi).rev() {
                    list.push(table, index);
                }
            }
            SpinLock::new("kmem", list)
        });

        let first = start.add_pages(table_frames);
        info!(
            "frame allocator: {frames} frames from {first} over {cpus} cpus, \
             {table_frames} descriptor frames"
        );
        Ok(Self {
            mapper,
            descriptors,
            first,
            frames,
            cpus,
            lists,
        })
    }

    #[inline]
    fn table(&self) -> &[FrameDescriptor] {
        // SAFETY: written in `new`, never moved, lives as long as `self`.
        unsafe { core::slice::from_raw_parts(self.descriptors.as_ptr(), self.frames as usize) }
    }

    /// Number of CPUs sharing the pool.
    #[inline]
    #[must_use]
    pub const fn cpus(&self) -> usize {
        self.cpus
    }

    /// Frames in the pool, free or not.
    #[inline]
    #[must_use]
    pub const fn total_frames(&self) -> u64 {
        self.frames as u64
    }

    /// First frame of the pool.
    #[inline]
    #[must_use]
    pub const fn first_frame(&self) -> PhysicalPage {
        self.first
    }

    /// Free frames on every list right now.
    #[must_use]
    pub fn free_frames(&self) -> u64 {
        (0..self.cpus).map(|cpu| self.free_frames_on(cpu)).sum()
    }

    /// Free frames on `cpu`'s list right now.
    ///
    /// # Panics
    /// If `cpu` is not below [`cpus`](Self::cpus).
    #[must_use]
    pub fn free_frames_on(&self, cpu: usize) -> u64 {
        u64::from(self.list(cpu).lock().len())
    }

    /// `true` if `page` is one of the pool frames.
    #[must_use]
    pub fn contains(&self, page: PhysicalPage) -> bool {
        page.frame_number()
            .checked_sub(self.first.frame_number())
            .is_some_and(|i| i < u64::from(self.frames))
    }

    /// Allocate a frame for `cpu`, stealing from other CPUs if its own list is empty.
    ///
    /// The frame comes back with one reference and filled with
    /// [`ALLOC_POISON`]. Returns `None` once every list is empty.
    ///
    /// # Panics
    /// If `cpu` is not below [`cpus`](Self::cpus).
    pub fn alloc(&self, cpu: usize) -> Option<PhysicalPage> {
        let table = self.table();
        let Some(index) = self
            .list(cpu)
            .with_lock(|list| list.pop(table))
            .or_else(|| self.steal(cpu))
        else {
            warn!("alloc: out of frames on cpu {cpu}");
            return None;
        };
        let page = self.page(index);
        self.poison(page, ALLOC_POISON);
        Some(page)
    }

    /// Take one frame from the first other CPU that has any.
    fn steal(&self, cpu: usize) -> Option<u32> {
        let table = self.table();
        (0..self.cpus).filter(|&other| other != cpu).find_map(|other| {
            let index = self.lists[other].with_lock(|list| list.pop(table))?;
            trace!("cpu {cpu} stole frame {} from cpu {other}", self.page(index));
            Some(index)
        })
    }

    /// Give back a frame holding exactly one reference.
    ///
    /// # Panics
    /// - If `pa` is not page-aligned or not a pool frame.
    /// - If the frame is already free (double free) or still shared.
    pub fn free(&self, cpu: usize, pa: PhysicalAddress) {
        let index = self.index_of("free", pa);
        match self.table()[index as usize].refcount.load(Ordering::Acquire) {
            0 => panic!("free: double free of {pa}"),
            1 => self.release(cpu, index, "free"),
            n => panic!("free: {pa} is shared by {n} references"),
        }
    }

    /// Add a reference to an allocated frame.
    ///
    /// # Panics
    /// If `pa` is not a pool frame or the frame is free.
    pub fn add_ref(&self, pa: PhysicalAddress) {
        let index = self.index_of("add_ref", pa);
        let added = self.table()[index as usize].refcount.fetch_update(
            Ordering::AcqRel,
            Ordering::Acquire,
            |n| (n != 0).then_some(n + 1),
        );
        assert!(added.is_ok(), "add_ref: frame {pa} is free");
    }

    /// Drop a reference; the last one puts the frame on `cpu`'s list.
    ///
    /// Returns `true` if this call freed the frame.
    ///
    /// # Panics
    /// If `pa` is not a pool frame or the frame is already free.
    pub fn dec_ref(&self, cpu: usize, pa: PhysicalAddress) -> bool {
        let index = self.index_of("dec_ref", pa);
        let refcount = &self.table()[index as usize].refcount;
        let mut count = refcount.load(Ordering::Acquire);
        loop {
            match count {
                0 => panic!("dec_ref: frame {pa} already free"),
                1 => {
                    self.release(cpu, index, "dec_ref");
                    return true;
                }
                n => match refcount.compare_exchange_weak(
                    n,
                    n - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return false,
                    Err(actual) => count = actual,
                },
            }
        }
    }

    /// References held on `pa` right now.
    ///
    /// # Panics
    /// If `pa` is not a pool frame.
    #[must_use]
    pub fn ref_count(&self, pa: PhysicalAddress) -> u32 {
        let index = self.index_of("ref_count", pa);
        self.table()[index as usize].refcount.load(Ordering::Acquire)
    }

    /// A [`FrameAlloc`] view that allocates and releases on `cpu`.
    ///
    /// # Panics
    /// If `cpu` is not below [`cpus`](Self::cpus).
    #[must_use]
    pub fn on_cpu(&self, cpu: usize) -> CpuFrameAlloc<'_, M> {
        assert!(cpu < self.cpus, "on_cpu: cpu {cpu} out of range");
        CpuFrameAlloc { frames: self, cpu }
    }

    /// Drop the last reference of `index` and push it on `cpu`'s list.
    fn release(&self, cpu: usize, index: u32, op: &str) {
        let page = self.page(index);
        self.poison(page, FREE_POISON);
        let table = self.table();
        let refcount = &table[index as usize].refcount;
        self.list(cpu).with_lock(|list| {
            let count = refcount.load(Ordering::Acquire);
            assert!(count == 1, "{op}: frame {page} has {count} references at release");
            // Linked before the count drops: a zero count is always on a list.
            list.push(table, index);
            let dropped = refcount.compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire);
            assert!(dropped.is_ok(), "{op}: frame {page} gained a reference during release");
        });
    }

    fn list(&self, cpu: usize) -> &SpinLock<FreeList> {
        assert!(cpu < self.cpus, "cpu {cpu} out of range");
        &self.lists[cpu]
    }

    fn index_of(&self, op: &str, pa: PhysicalAddress) -> u32 {
        assert!(pa.is_page_aligned(), "{op}: {pa} not page aligned");
        let index = pa
            .page()
            .frame_number()
            .checked_sub(self.first.frame_number())
            .filter(|&i| i < u64::from(self.frames))
            .and_then(|i| u32::try_from(i).ok());
        let Some(index) = index else {
            panic!("{op}: {pa} outside pool");
        };
        index
    }

    const fn page(&self, index: u32) -> PhysicalPage {
        self.first.add_pages(index as u64)
    }

    fn poison(&self, page: PhysicalPage, byte: u8) {
        // SAFETY: the caller holds the only reference to `page`.
        let bytes: &mut [u8; PAGE_SIZE as usize] = unsafe { self.mapper.phys_to_mut(page.base()) };
        bytes.fill(byte);
    }
}

/// Pool indices `[lo, hi)` of `cpu` when `frames` are split over `cpus`.
#[allow(clippy::cast_possible_truncation)]
const fn chunk(frames: u32, cpus: usize, cpu: usize) -> (u32, u32) {
    let n = frames as u64;
    let c = cpus as u64;
    let k = cpu as u64;
    ((n * k / c) as u32, (n * (k + 1) / c) as u32)
}

/// A [`FrameAllocator`] bound to one CPU.
///
/// `free_4k` drops a single reference, so frames shared with
/// [`FrameAllocator::add_ref`] stay allocated until their last owner lets go.
#[derive(Copy, Clone)]
pub struct CpuFrameAlloc<'a, M: PhysMapper> {
    frames: &'a FrameAllocator<M>,
    cpu: usize,
}

impl<M: PhysMapper> CpuFrameAlloc<'_, M> {
    #[must_use]
    pub const fn cpu(&self) -> usize {
        self.cpu
    }
}

impl<M: PhysMapper> FrameAlloc for CpuFrameAlloc<'_, M> {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.frames.alloc(self.cpu)
    }

    fn free_4k(&mut self, page: PhysicalPage) {
        self.frames.dec_ref(self.cpu, page.base());
    }
}
