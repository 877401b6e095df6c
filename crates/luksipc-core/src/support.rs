//! Small platform helpers that don't belong to any single component: disk
//! size probing and existence checks.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

const BLKGETSIZE64: libc::c_ulong = 0x8000_1272;

/// Query the size, in bytes, of the block device backing `fd` via the
/// `BLKGETSIZE64` ioctl. Returns 0 on failure, matching the original tool's
/// fail-soft behavior (the caller is expected to treat 0 as "unknown").
pub fn disk_size_of_fd(fd: &File) -> u64 {
    let mut size: u64 = 0;
    let rc = unsafe { libc::ioctl(fd.as_raw_fd(), BLKGETSIZE64, &raw mut size) };
    if rc == -1 {
        tracing::warn!(error = %std::io::Error::last_os_error(), "BLKGETSIZE64 ioctl failed");
        return 0;
    }
    size
}

/// Same as [`disk_size_of_fd`], opening the path read-only first. Also used
/// for regular files in tests, where it falls back to the file's length
/// since `BLKGETSIZE64` only applies to actual block devices.
pub fn disk_size_of_path(path: &Path) -> u64 {
    let Ok(file) = File::open(path) else {
        tracing::warn!(path = %path.display(), "failed to open path to determine size");
        return 0;
    };
    let ioctl_size = disk_size_of_fd(&file);
    if ioctl_size != 0 {
        return ioctl_size;
    }
    file.metadata().map(|m| m.len()).unwrap_or(0)
}

pub fn file_exists(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn disk_size_of_path_falls_back_to_file_length_for_regular_files() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 4096]).unwrap();
        f.flush().unwrap();
        assert_eq!(disk_size_of_path(f.path()), 4096);
    }

    #[test]
    fn file_exists_reports_false_for_missing_path() {
        assert!(!file_exists(Path::new("/nonexistent/luksipc-test-path")));
    }

    #[test]
    fn file_exists_reports_true_for_present_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        assert!(file_exists(f.path()));
    }
}
