//! Generates the LUKS key-slot-0 key material file.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::random::RandomSource;

/// Exactly this many random bytes are written to the key file, matching
/// what `cryptsetup luksFormat --key-file` reads back for slot 0.
pub const KEY_FILE_SIZE: usize = 4096;

#[derive(Debug, thiserror::Error)]
pub enum KeyfileError {
    #[error("keyfile {0} already exists, refusing to overwrite")]
    AlreadyExists(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Create `path` containing 4096 random bytes with mode 0600. If the file
/// already exists, fails unless `force` is set (used when safety checks are
/// disabled), in which case the existing file is overwritten.
pub fn gen_keyfile(
    path: &Path,
    force: bool,
    rng: &mut impl RandomSource,
) -> Result<(), KeyfileError> {
    if path.exists() && !force {
        return Err(KeyfileError::AlreadyExists(path.display().to_string()));
    }
    if path.exists() {
        tracing::warn!(path = %path.display(), "keyfile already exists, overwriting because safety checks are disabled");
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;

    let mut key_data = vec![0u8; KEY_FILE_SIZE];
    rng.fill(&mut key_data)?;
    file.write_all(&key_data)?;
    Ok(())
}
