//! Entropy is accessed only through this narrow capability so the controller
//! and the device-mapper handle generator stay testable without touching
//! `/dev/urandom`.

use std::fs::File;
use std::io::Read;

use crate::error::SubprocessError;

pub trait RandomSource {
    /// Fill `buf` with random bytes, or fail. Production implementations
    /// should treat a short read as a failure, not a partial success.
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<()>;

    /// Append `n` bytes of randomness to `s` as lowercase hex.
    fn append_hex(&mut self, s: &mut String, n: usize) -> std::io::Result<()> {
        let mut raw = vec![0u8; n];
        self.fill(&mut raw)?;
        for byte in raw {
            s.push_str(&format!("{byte:02x}"));
        }
        Ok(())
    }
}

/// Production entropy source backed by `/dev/urandom`.
pub struct UrandomSource {
    file: File,
}

impl UrandomSource {
    pub fn open() -> std::io::Result<Self> {
        Ok(Self {
            file: File::open("/dev/urandom")?,
        })
    }
}

impl RandomSource for UrandomSource {
    fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.read_exact(buf)
    }
}

/// Generate the 8 hex character suffix used for both the raw-device alias
/// handle and the write-device (`luksipc_XXXXXXXX`) handle.
pub fn random_hex_tag(rng: &mut impl RandomSource, byte_len: usize) -> Result<String, SubprocessError> {
    let mut s = String::new();
    rng.append_hex(&mut s, byte_len)
        .map_err(SubprocessError::Spawn)?;
    Ok(s)
}

#[cfg(test)]
pub mod test_support {
    use super::RandomSource;

    /// Deterministic, test-only source: cycles through a fixed byte pattern.
    /// Not cryptographically meaningful, matches the spirit of the original
    /// tool's own xorshift-based fault-injection PRNG, which likewise exists
    /// purely to make test runs reproducible.
    pub struct FixedSource {
        pattern: Vec<u8>,
        pos: usize,
    }

    impl FixedSource {
        pub fn new(pattern: impl Into<Vec<u8>>) -> Self {
            Self {
                pattern: pattern.into(),
                pos: 0,
            }
        }
    }

    impl RandomSource for FixedSource {
        fn fill(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
            for slot in buf.iter_mut() {
                *slot = self.pattern[self.pos % self.pattern.len()];
                self.pos += 1;
            }
            Ok(())
        }
    }
}
