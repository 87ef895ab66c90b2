use kernel_memory_addresses::VirtualAddress;

/// Why a walk could not reach a leaf slot.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WalkError {
    #[error("virtual address {0} is beyond the translatable range")]
    OutOfRange(VirtualAddress),
    #[error("out of memory for page tables")]
    OutOfMemory,
}

/// Why a mapping could not be installed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MapError {
    #[error("virtual address {0} is beyond the translatable range")]
    OutOfRange(VirtualAddress),
    #[error("out of memory")]
    OutOfMemory,
}

impl From<WalkError> for MapError {
    fn from(value: WalkError) -> Self {
        match value {
            WalkError::OutOfRange(va) => Self::OutOfRange(va),
            WalkError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

/// Why a copy across the user/kernel boundary failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CopyError {
    #[error("user address {0} is not mapped")]
    Unmapped(VirtualAddress),
    #[error("string not terminated within the buffer")]
    Unterminated,
}
