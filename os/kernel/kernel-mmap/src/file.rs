//! The file layer as seen from a mapped region.

/// Why a file read or write failed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FileError {
    #[error("file is not open for reading")]
    NotReadable,
    #[error("file is not open for writing")]
    NotWritable,
    #[error("i/o error at file offset {0:#x}")]
    Io(u64),
}

/// An open file that can back a mapping.
///
/// Each region holds one `Arc` of its file; the strong count is the file's
/// reference count.
pub trait BackingFile: Send + Sync {
    /// Opened for reading.
    fn readable(&self) -> bool;

    /// Opened for writing.
    fn writable(&self) -> bool;

    /// Current length in bytes.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read into `buf` starting at `offset`.
    ///
    /// Returns the number of bytes read; fewer than `buf.len()` only at the
    /// end of the file.
    ///
    /// # Errors
    /// [`FileError::NotReadable`] or an I/O failure.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<usize, FileError>;

    /// Write `buf` starting at `offset`, returning the number of bytes written.
    ///
    /// # Errors
    /// [`FileError::NotWritable`] or an I/O failure.
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<usize, FileError>;
}
