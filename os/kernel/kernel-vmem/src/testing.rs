//! In-memory "RAM" for the unit tests.

use crate::{FrameAlloc, OffsetPhysMapper};
use kernel_info::memory::{KERNEL_BASE, PAGE_SIZE};
use kernel_memory_addresses::{PhysicalAddress, PhysicalPage};

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
#[derive(Clone)]
struct Frame([u8; PAGE_SIZE as usize]);

/// Simulated physical memory starting at [`KERNEL_BASE`], with a trivial
/// frame allocator that tracks how many frames are out.
pub struct TestRam {
    frames: Vec<Frame>,
    free: Vec<PhysicalPage>,
    pub mapper: OffsetPhysMapper,
}

impl TestRam {
    pub fn with_frames(n: usize) -> Self {
        let frames = vec![Frame([0xAA; PAGE_SIZE as usize]); n];
        let mapper = OffsetPhysMapper::for_buffer(
            PhysicalAddress::new(KERNEL_BASE),
            frames.as_ptr().cast::<u8>(),
        );
        let free = (0..n as u64)
            .rev()
            .map(|i| PhysicalAddress::new(KERNEL_BASE + i * PAGE_SIZE).page())
            .collect();
        Self {
            frames,
            free,
            mapper,
        }
    }

    /// Frames currently handed out.
    pub fn in_use(&self) -> usize {
        self.frames.len() - self.free.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Let only the next `n` allocations succeed.
    pub fn limit(&mut self, n: usize) -> Vec<PhysicalPage> {
        let keep = self.free.len() - n.min(self.free.len());
        self.free.drain(..keep).collect()
    }

    pub fn restore(&mut self, held: Vec<PhysicalPage>) {
        self.free.splice(0..0, held);
    }
}

impl FrameAlloc for TestRam {
    fn alloc_4k(&mut self) -> Option<PhysicalPage> {
        self.free.pop()
    }

    fn free_4k(&mut self, page: PhysicalPage) {
        assert!(!self.free.contains(&page), "test ram: double free of {page}");
        self.free.push(page);
    }
}
