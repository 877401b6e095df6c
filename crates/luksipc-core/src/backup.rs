//! Header backup: a raw dump of the first bytes of the *raw* device,
//! written before any destructive action, giving an offline recovery
//! artifact for the original layout.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

pub const HEADER_BACKUP_BLOCKSIZE: usize = 128 * 1024;
pub const HEADER_BACKUP_BLOCKCOUNT: u64 = 1024;
pub const HEADER_BACKUP_SIZE_BYTES: u64 = HEADER_BACKUP_BLOCKSIZE as u64 * HEADER_BACKUP_BLOCKCOUNT;

/// Copies `min(HEADER_BACKUP_SIZE_BYTES, read_dev_size)` bytes from
/// `raw_device` into `backup_file`, in fixed-size blocks, fsyncing at the
/// end.
pub fn backup_header(
    raw_device: &Path,
    backup_file: &Path,
    read_dev_size: u64,
) -> std::io::Result<()> {
    let to_copy = HEADER_BACKUP_SIZE_BYTES.min(read_dev_size);

    let mut src = File::open(raw_device)?;
    let mut dst = File::create(backup_file)?;

    let mut buf = vec![0u8; HEADER_BACKUP_BLOCKSIZE];
    let mut remaining = to_copy;
    while remaining > 0 {
        let this_block = remaining.min(HEADER_BACKUP_BLOCKSIZE as u64) as usize;
        src.read_exact(&mut buf[..this_block])?;
        dst.write_all(&buf[..this_block])?;
        remaining -= this_block as u64;
    }
    dst.sync_all()?;
    Ok(())
}
