//! # Boot Memory Description

use crate::memory::{MAX_CPUS, PHYS_TOP};
use kernel_memory_addresses::{PAGE_SIZE, PhysicalAddress, PhysicalPage};

/// What early boot tells the frame allocator about the machine.
///
/// The range `[first_usable, past_last)` is RAM the kernel image does not
/// occupy. Neither end needs to be page-aligned; [`frames`](Self::frames)
/// shrinks the range inward to whole frames.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BootMemory {
    /// First byte past the kernel image.
    pub first_usable: PhysicalAddress,

    /// One past the last usable byte of RAM.
    pub past_last: PhysicalAddress,

    /// Number of harts that will call into the allocator (`1..=MAX_CPUS`).
    pub cpus: usize,
}

impl BootMemory {
    #[must_use]
    pub const fn new(
        first_usable: PhysicalAddress,
        past_last: PhysicalAddress,
        cpus: usize,
    ) -> Self {
        Self {
            first_usable,
            past_last,
            cpus,
        }
    }

    /// Everything between the end of the kernel image and [`PHYS_TOP`].
    #[must_use]
    pub const fn up_to_phys_top(kernel_end: PhysicalAddress, cpus: usize) -> Self {
        Self::new(kernel_end, PhysicalAddress::new(PHYS_TOP), cpus)
    }

    /// Whole frames inside the usable range: `(first frame, frame count)`.
    ///
    /// Returns `None` if not even one frame fits.
    #[must_use]
    pub const fn frames(&self) -> Option<(PhysicalPage, u64)> {
        let Some(first) = self.first_usable.align_up() else {
            return None;
        };
        let last = self.past_last.page().base();
        if last.as_u64() <= first.as_u64() {
            return None;
        }
        Some((
            first.page(),
            (last.as_u64() - first.as_u64()) / PAGE_SIZE,
        ))
    }

    /// The hart count is in `1..=MAX_CPUS`.
    #[must_use]
    pub const fn has_valid_cpus(&self) -> bool {
        self.cpus >= 1 && self.cpus <= MAX_CPUS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_shrink_inward() {
        let boot = BootMemory::new(
            PhysicalAddress::new(0x8000_0010),
            PhysicalAddress::new(0x8000_5FFF),
            2,
        );
        let (first, count) = boot.frames().unwrap();
        assert_eq!(first.base().as_u64(), 0x8000_1000);
        assert_eq!(count, 4);
    }

    #[test]
    fn empty_range_has_no_frames() {
        let boot = BootMemory::new(
            PhysicalAddress::new(0x8000_0001),
            PhysicalAddress::new(0x8000_1FFF),
            1,
        );
        assert!(boot.frames().is_none());

        let inverted = BootMemory::new(
            PhysicalAddress::new(0x9000_0000),
            PhysicalAddress::new(0x8000_0000),
            1,
        );
        assert!(inverted.frames().is_none());
    }

    #[test]
    fn cpu_bounds() {
        let mut boot = BootMemory::up_to_phys_top(PhysicalAddress::new(0x8040_0000), 0);
        assert!(!boot.has_valid_cpus());
        boot.cpus = MAX_CPUS;
        assert!(boot.has_valid_cpus());
        boot.cpus = MAX_CPUS + 1;
        assert!(!boot.has_valid_cpus());
        assert_eq!(boot.past_last.as_u64(), PHYS_TOP);
    }
}
