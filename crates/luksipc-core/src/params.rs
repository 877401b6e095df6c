//! Validated, immutable conversion parameters. The CLI binary is
//! responsible for turning user-facing flags into this type; this module
//! only owns validation and rounding rules.

use std::path::PathBuf;

use crate::error::ParamsError;

/// Minimum chunk size: must exceed a typical LUKS header size, since the
/// copy engine relies on the read cursor running at least one chunk ahead
/// of the write cursor to make in-place conversion safe.
pub const MIN_CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// All writes round the chunk size up to this alignment.
pub const CHUNK_SIZE_ALIGNMENT: u64 = 4096;

#[derive(Debug, Clone)]
pub struct ConversionParameters {
    pub raw_device: PathBuf,
    pub read_device: PathBuf,
    pub key_file: PathBuf,
    pub luks_format_params: Option<String>,
    pub backup_file: PathBuf,
    pub resume_file: PathBuf,
    pub chunk_size: u64,
    pub safety_checks: bool,
    pub batch_mode: bool,
    pub resuming: bool,
    pub reluksifying: bool,
    pub delete_resume_on_success: bool,
}

pub struct ConversionParametersBuilder {
    raw_device: PathBuf,
    read_device: Option<PathBuf>,
    key_file: PathBuf,
    luks_format_params: Option<String>,
    backup_file: PathBuf,
    resume_file: PathBuf,
    chunk_size: u64,
    safety_checks: bool,
    batch_mode: bool,
    resuming: bool,
    delete_resume_on_success: bool,
}

impl ConversionParametersBuilder {
    pub fn new(raw_device: PathBuf) -> Self {
        Self {
            raw_device,
            read_device: None,
            key_file: PathBuf::from("/root/initial_keyfile.bin"),
            luks_format_params: None,
            backup_file: PathBuf::from("header_backup.img"),
            resume_file: PathBuf::from("resume.bin"),
            chunk_size: MIN_CHUNK_SIZE,
            safety_checks: true,
            batch_mode: false,
            resuming: false,
            delete_resume_on_success: false,
        }
    }

    pub fn read_device(mut self, path: PathBuf) -> Self {
        self.read_device = Some(path);
        self
    }

    pub fn key_file(mut self, path: PathBuf) -> Self {
        self.key_file = path;
        self
    }

    pub fn luks_format_params(mut self, params: Option<String>) -> Self {
        self.luks_format_params = params;
        self
    }

    pub fn backup_file(mut self, path: PathBuf) -> Self {
        self.backup_file = path;
        self
    }

    pub fn resume_file(mut self, path: PathBuf) -> Self {
        self.resume_file = path;
        self
    }

    pub fn chunk_size(mut self, bytes: u64) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn safety_checks(mut self, enabled: bool) -> Self {
        self.safety_checks = enabled;
        self
    }

    pub fn batch_mode(mut self, enabled: bool) -> Self {
        self.batch_mode = enabled;
        self
    }

    pub fn resuming(mut self, enabled: bool) -> Self {
        self.resuming = enabled;
        self
    }

    pub fn delete_resume_on_success(mut self, enabled: bool) -> Self {
        self.delete_resume_on_success = enabled;
        self
    }

    pub fn build(self) -> Result<ConversionParameters, ParamsError> {
        if self.raw_device.as_os_str().is_empty() {
            return Err(ParamsError::EmptyDevicePath);
        }
        if let Some(params) = &self.luks_format_params {
            if params.split(',').any(str::is_empty) && !params.is_empty() {
                return Err(ParamsError::EmptyLuksParam);
            }
        }

        let rounded_chunk_size =
            self.chunk_size.div_ceil(CHUNK_SIZE_ALIGNMENT) * CHUNK_SIZE_ALIGNMENT;
        if rounded_chunk_size < MIN_CHUNK_SIZE {
            return Err(ParamsError::ChunkSizeTooSmall(
                rounded_chunk_size,
                MIN_CHUNK_SIZE,
            ));
        }

        let reluksifying = self.read_device.is_some();
        let read_device = self.read_device.unwrap_or_else(|| self.raw_device.clone());

        Ok(ConversionParameters {
            raw_device: self.raw_device,
            read_device,
            key_file: self.key_file,
            luks_format_params: self.luks_format_params,
            backup_file: self.backup_file,
            resume_file: self.resume_file,
            chunk_size: rounded_chunk_size,
            safety_checks: self.safety_checks,
            batch_mode: self.batch_mode,
            resuming: self.resuming,
            reluksifying,
            delete_resume_on_success: self.delete_resume_on_success,
        })
    }
}
