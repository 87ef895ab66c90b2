//! # Memory Layout

pub use kernel_memory_addresses::{PAGE_SHIFT, PAGE_SIZE};

/// Number of entries in one page table (9 index bits per level).
pub const PTE_PER_TABLE: usize = 512;

/// Depth of the Sv39 translation tree.
pub const PAGE_TABLE_LEVELS: usize = 3;

/// One past the highest virtual address the page tables translate.
///
/// Sv39 could go one bit higher, but then addresses with bit 38 set would
/// need sign extension; staying below it keeps every address non-negative.
pub const MAX_VIRTUAL_ADDRESS: u64 = 1 << (9 + 9 + 9 + 12 - 1);

/// Trampoline page, mapped at the very top of every address space.
pub const TRAMPOLINE: u64 = MAX_VIRTUAL_ADDRESS - PAGE_SIZE;

/// Per-process trap frame, just below the trampoline.
pub const TRAPFRAME: u64 = TRAMPOLINE - PAGE_SIZE;

/// Initial top of the memory-mapped file window. Regions are handed out
/// downward from here.
pub const MMAP_TOP: u64 = TRAPFRAME;

/// Lowest address the memory-mapped file window may reach. The process heap
/// grows up to, but never past, this boundary.
pub const MMAP_FLOOR: u64 = MAX_VIRTUAL_ADDRESS / 2;

/// Physical address where RAM starts and the kernel image is loaded.
pub const KERNEL_BASE: u64 = 0x8000_0000;

/// One past the last byte of RAM handed to the frame allocator.
pub const PHYS_TOP: u64 = KERNEL_BASE + 128 * 1024 * 1024;

/// Offset the kernel adds to a physical address to reach its bytes.
/// Physical memory is identity-mapped, so this is zero.
pub const DIRECT_MAP_OFFSET: u64 = 0;

/// Maximum number of harts the per-CPU structures are sized for.
pub const MAX_CPUS: usize = 8;

/// Memory-mapped region slots per address space.
pub const VMA_SLOTS: usize = 100;

/// Byte written over a frame when it returns to a free list.
pub const FREE_POISON: u8 = 0x01;

/// Byte written over a frame just before it is handed out.
pub const ALLOC_POISON: u8 = 0x05;

const _: () = {
    assert!(PTE_PER_TABLE * 8 == PAGE_SIZE as usize);
    assert!(MAX_VIRTUAL_ADDRESS.is_multiple_of(PAGE_SIZE));
    assert!(MMAP_FLOOR < MMAP_TOP);
    assert!(MMAP_TOP < TRAMPOLINE);
    assert!(PHYS_TOP > KERNEL_BASE);
    assert!(PHYS_TOP.is_multiple_of(PAGE_SIZE));
    assert!(VMA_SLOTS <= 128);
    assert!(FREE_POISON != ALLOC_POISON);
};
