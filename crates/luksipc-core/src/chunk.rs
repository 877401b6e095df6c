//! Fixed-capacity buffer used as the unit of transfer between the read and
//! write devices. `read_at`/`write_at` are the only place positioned I/O
//! against a device descriptor happens.

use std::fs::File;
use std::os::unix::fs::FileExt;

use crate::error::ChunkError;

#[derive(Debug)]
pub struct Chunk {
    data: Vec<u8>,
    used: usize,
}

impl Chunk {
    /// Allocate a zeroed chunk of the given capacity.
    pub fn alloc(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            used: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn set_used(&mut self, used: usize) {
        debug_assert!(used <= self.data.len());
        self.used = used.min(self.data.len());
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// Full backing storage, including bytes beyond `used`. Needed when
    /// serializing a resume record, which always persists the whole
    /// capacity regardless of how much of it is semantically meaningful.
    pub fn full_storage(&self) -> &[u8] {
        &self.data
    }

    pub fn full_storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Read up to `size` bytes from `fd` at the absolute `offset`, setting
    /// `used` to the number of bytes actually read. A short read is not an
    /// error; it is reported through `used`.
    pub fn read_at(&mut self, fd: &File, offset: u64, size: usize) -> Result<usize, ChunkError> {
        if size > self.data.len() {
            return Err(ChunkError::ExceedsCapacity {
                requested: size,
                capacity: self.data.len(),
            });
        }
        let bytes_read = read_partial(fd, &mut self.data[..size], offset)?;
        self.used = bytes_read;
        Ok(bytes_read)
    }

    /// Write exactly `used` bytes of this chunk to `fd` at the absolute
    /// `offset`. A short write is logged and surfaced to the caller via the
    /// returned count rather than as an error.
    pub fn write_at(&self, fd: &File, offset: u64) -> Result<usize, ChunkError> {
        let written = fd.write_at(&self.data[..self.used], offset)?;
        if written < self.used {
            tracing::warn!(written, expected = self.used, offset, "short write");
        }
        Ok(written)
    }
}

/// `File::read_at` does not guarantee it fills the buffer; loop until EOF or
/// the buffer is full, mirroring a single blocking `read(2)` call's
/// short-read semantics without silently masking a genuine EOF.
fn read_partial(fd: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    match fd.read_at(buf, offset) {
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => read_partial(fd, buf, offset),
        Err(e) => Err(e),
    }
}
