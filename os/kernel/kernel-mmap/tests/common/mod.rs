//! Simulated RAM and an in-memory file for the integration tests.

#![allow(dead_code)]

use kernel_alloc::{CpuFrameAlloc, FrameAllocator};
use kernel_info::boot::BootMemory;
use kernel_info::memory::{KERNEL_BASE, PAGE_SIZE};
use kernel_memory_addresses::PhysicalAddress;
use kernel_mmap::{BackingFile, FileError};
use kernel_sync::SpinLock;
use kernel_vmem::OffsetPhysMapper;
use std::sync::Arc;

#[repr(C, align(4096))]
#[derive(Clone)]
struct Frame([u8; PAGE_SIZE as usize]);

/// Host memory posing as physical RAM at `KERNEL_BASE`, with its allocator.
pub struct Machine {
    _ram: Vec<Frame>,
    pub mapper: OffsetPhysMapper,
    pub frames: FrameAllocator<OffsetPhysMapper>,
}

impl Machine {
    /// `frames` frames of RAM (one of them holds the descriptor table).
    pub fn new(frames: usize, cpus: usize) -> Self {
        let mut ram = vec![Frame([0; PAGE_SIZE as usize]); frames];
        let base = PhysicalAddress::new(KERNEL_BASE);
        let mapper = OffsetPhysMapper::for_buffer(base, ram.as_mut_ptr().cast::<u8>());
        let boot = BootMemory::new(base, base + frames as u64 * PAGE_SIZE, cpus);
        // SAFETY: `ram` lives as long as the allocator.
        let frames = unsafe { FrameAllocator::new(mapper, &boot) }.unwrap();
        Self {
            _ram: ram,
            mapper,
            frames,
        }
    }

    pub fn cpu(&self, cpu: usize) -> CpuFrameAlloc<'_, OffsetPhysMapper> {
        self.frames.on_cpu(cpu)
    }
}

/// A file held in memory.
pub struct MemFile {
    data: SpinLock<Vec<u8>>,
    readable: bool,
    writable: bool,
}

impl MemFile {
    pub fn new(data: Vec<u8>, readable: bool, writable: bool) -> Arc<Self> {
        Arc::new(Self {
            data: SpinLock::new("memfile", data),
            readable,
            writable,
        })
    }

    /// A readable and writable file of `len` patterned bytes.
    pub fn patterned(len: usize) -> Arc<Self> {
        Self::new(pattern(len), true, true)
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

impl BackingFile for MemFile {
    fn readable(&self) -> bool {
        self.readable
    }

    fn writable(&self) -> bool {
        self.writable
    }

    fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError> {
        if !self.readable {
            return Err(FileError::NotReadable);
        }
        let data = self.data.lock();
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, FileError> {
        if !self.writable {
            return Err(FileError::NotWritable);
        }
        let mut data = self.data.lock();
        let start = offset as usize;
        if data.len() < start + buf.len() {
            data.resize(start + buf.len(), 0);
        }
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(buf.len())
    }
}
