//! The conversion controller: the single state machine that owns every
//! resource for one run and is the only component allowed to decide a
//! stable [`ExitCode`]. Neither the copy engine nor the subprocess bridge
//! ever terminate the process directly.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use crate::backup::backup_header;
use crate::chunk::Chunk;
use crate::copy_engine::{self, CopyEngineState, CopyResult};
use crate::error::ControllerError;
use crate::luksdm;
use crate::mount::is_block_device_mounted;
use crate::params::ConversionParameters;
use crate::random::{random_hex_tag, RandomSource};
use crate::resume::ResumeRecord;
use crate::signal::ShutdownFlag;
use crate::stats::ProgressStats;
use crate::subprocess::CommandRunner;
use crate::support::{disk_size_of_fd, file_exists};

/// Above this absolute difference between read and write device sizes,
/// something is badly wrong and we refuse to proceed.
const MAX_PLAUSIBLE_SIZE_DIFF: u64 = 0x1000_0000;

#[derive(Debug, PartialEq, Eq)]
pub enum ConversionOutcome {
    Finished,
    AbortedResumeFileWritten,
    AbortedResumeFileWriteFailed,
}

pub struct Controller<'a> {
    pub runner: &'a dyn CommandRunner,
}

impl<'a> Controller<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Non-destructive precondition checks. Each failure is collected and
    /// either aborts the run or is demoted to a warning, depending on
    /// `params.safety_checks`.
    pub fn check_preconditions(&self, params: &ConversionParameters) -> Result<(), ControllerError> {
        let mut failures = Vec::new();

        if !params.resuming && !params.reluksifying {
            let raw_device = params.raw_device.to_string_lossy();
            match luksdm::is_luks(self.runner, &raw_device) {
                Ok(true) => failures.push(format!("{raw_device}: already LUKS")),
                Ok(false) => {}
                Err(e) => failures.push(format!("{raw_device}: unable to check LUKS status: {e}")),
            }
        }

        if !params.resuming {
            if file_exists(&params.backup_file) {
                failures.push(format!(
                    "backup file {} already exists",
                    params.backup_file.display()
                ));
            }
            if file_exists(&params.resume_file) {
                failures.push(format!(
                    "resume file {} already exists",
                    params.resume_file.display()
                ));
            }
            if file_exists(&params.key_file) {
                failures.push(format!(
                    "key file {} already exists",
                    params.key_file.display()
                ));
            }
        }

        if is_block_device_mounted(&params.raw_device.to_string_lossy()) {
            failures.push(format!(
                "raw block device {} appears to be mounted",
                params.raw_device.display()
            ));
        }
        if params.reluksifying && is_block_device_mounted(&params.read_device.to_string_lossy()) {
            failures.push(format!(
                "read block device {} appears to be mounted",
                params.read_device.display()
            ));
        }

        if failures.is_empty() {
            return Ok(());
        }

        if params.safety_checks {
            return Err(ControllerError::Precondition(failures.join("; ")));
        }

        for failure in &failures {
            tracing::warn!("{failure}, continuing only because safety checks have been disabled");
        }
        Ok(())
    }

    /// Runs the entire conversion to completion, returning the outcome
    /// (never panics on expected I/O or tool failures; those are
    /// `ControllerError`s).
    pub fn convert(
        &self,
        params: &ConversionParameters,
        rng: &mut impl RandomSource,
        shutdown: &ShutdownFlag,
    ) -> Result<ConversionOutcome, ControllerError> {
        // Preconditions are the caller's responsibility: they must run
        // exactly once, before any keyfile is generated, or the
        // keyfile-exists check here would trip on the very file the caller
        // just created.
        let write_handle = generate_write_handle(rng)?;
        tracing::info!(write_handle, "generated randomized write handle");

        let raw_device_str = params.raw_device.to_string_lossy().to_string();
        let raw_device_alias = luksdm::dm_create_dynamic_alias(
            self.runner,
            rng,
            &raw_device_str,
            Some("luksipc_raw"),
        )
        .map_err(ControllerError::CannotInitializeDeviceAlias)?
        .ok_or_else(|| {
            ControllerError::CannotInitializeDeviceAlias(
                crate::error::LuksDmError::RemoveRetriesExhausted { attempts: 0 },
            )
        })?;
        tracing::info!(raw_device_alias, raw_device = raw_device_str, "created raw device alias");

        let mut buffers = [
            Chunk::alloc(params.chunk_size as usize),
            Chunk::alloc(params.chunk_size as usize),
        ];

        let mut resume_file = open_resume_file(&params.resume_file, params.resuming)
            .map_err(ControllerError::CannotOpenResumeFile)?;

        let read_fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&params.read_device)
            .map_err(|e| ControllerError::CannotOpenReadDevice(e.to_string()))?;
        let read_dev_size = disk_size_of_fd(&read_fd);
        if read_dev_size == 0 {
            return Err(ControllerError::UnableToGetRawDiskSize);
        }
        tracing::info!(
            device = %params.read_device.display(),
            size = read_dev_size,
            "opened reading device"
        );

        if !params.resuming {
            backup_header(&params.raw_device, &params.backup_file, read_dev_size)
                .map_err(ControllerError::FailedToBackupHeader)?;
            tracing::info!(backup_file = %params.backup_file.display(), "header backup complete");
        }

        if read_dev_size < params.chunk_size {
            return Err(ControllerError::SmallDiskCornerCase);
        }

        if !params.resuming {
            let n = buffers[0].read_at(&read_fd, 0, params.chunk_size as usize)?;
            if n as u64 != params.chunk_size {
                return Err(ControllerError::UnableToReadFirstChunk);
            }

            let available = luksdm::is_mapper_name_available(self.runner, &write_handle)
                .map_err(ControllerError::FailedToPerformLuksFormat)?;
            if !available {
                return Err(ControllerError::WriteHandleUnavailable(write_handle));
            }

            tracing::info!(device = %params.raw_device.display(), "performing luksFormat");
            let formatted = luksdm::luks_format(
                self.runner,
                &raw_device_alias,
                &params.key_file.to_string_lossy(),
                params.luks_format_params.as_deref(),
            )
            .map_err(ControllerError::FailedToPerformLuksFormat)?;
            if !formatted {
                return Err(ControllerError::FailedToPerformLuksFormat(
                    crate::error::LuksDmError::RemoveRetriesExhausted { attempts: 0 },
                ));
            }
        }

        tracing::info!(device = %params.raw_device.display(), write_handle, "performing luksOpen");
        let opened = luksdm::luks_open(
            self.runner,
            &raw_device_alias,
            &params.key_file.to_string_lossy(),
            &write_handle,
        )
        .map_err(|_| ControllerError::FailedToPerformLuksOpen)?;
        if !opened {
            if !params.resuming {
                unpulp(&buffers[0], &read_fd);
            }
            return Err(ControllerError::FailedToPerformLuksOpen);
        }

        let write_device_path = format!("/dev/mapper/{write_handle}");
        let write_fd = match OpenOptions::new().read(true).write(true).open(&write_device_path) {
            Ok(fd) => fd,
            Err(e) => {
                if !params.resuming {
                    unpulp(&buffers[0], &read_fd);
                }
                return Err(ControllerError::FailedToOpenUnlockedCryptoDevice(e.to_string()));
            }
        };
        let write_dev_size = disk_size_of_fd(&write_fd);
        tracing::info!(device = write_device_path, size = write_dev_size, "opened unlocked crypto device");

        if let Err(e) = plausibilize_sizes(read_dev_size, write_dev_size, params.chunk_size) {
            if !params.resuming {
                unpulp(&buffers[0], &read_fd);
            }
            return Err(e);
        }

        let (out_offset, active_index) = if !params.resuming {
            (0u64, 0usize)
        } else {
            let (record, active) = ResumeRecord::read(
                &mut resume_file,
                params.chunk_size as usize,
                read_dev_size,
                write_dev_size,
                params.reluksifying,
                params.safety_checks,
            )?;
            buffers[0] = active;
            (record.out_offset, 0usize)
        };

        let end_out_offset = read_dev_size.min(write_dev_size);
        let in_offset = buffers[active_index].used() as u64 + out_offset;

        let mut state = CopyEngineState {
            buffers,
            active_index,
            in_offset,
            out_offset,
            end_out_offset,
            read_dev_size,
            write_dev_size,
            reluksifying: params.reluksifying,
        };

        let mut stats = ProgressStats::start(out_offset);
        let copy_result = copy_engine::run(
            &mut state,
            &read_fd,
            &write_fd,
            &mut resume_file,
            shutdown,
            &mut stats,
        )?;

        drop(read_fd);
        drop(write_fd);
        tracing::info!("synchronizing disk");
        unsafe {
            libc::sync();
        }
        tracing::info!("synchronizing of disk finished");

        if copy_result == CopyResult::ResumeWriteFailed {
            return Ok(ConversionOutcome::AbortedResumeFileWriteFailed);
        }

        if !luksdm::dm_remove(self.runner, &write_handle)
            .map_err(ControllerError::FailedToCloseLuksDevice)?
        {
            return Err(ControllerError::FailedToCloseLuksDevice(
                crate::error::LuksDmError::RemoveRetriesExhausted { attempts: 10 },
            ));
        }
        if !luksdm::dm_remove(self.runner, &alias_handle_from_path(&raw_device_alias))
            .map_err(ControllerError::FailedToRemoveDeviceMapperAlias)?
        {
            return Err(ControllerError::FailedToRemoveDeviceMapperAlias(
                crate::error::LuksDmError::RemoveRetriesExhausted { attempts: 10 },
            ));
        }

        if params.delete_resume_on_success && copy_result == CopyResult::Finished {
            let _ = std::fs::remove_file(&params.resume_file);
        }

        Ok(match copy_result {
            CopyResult::Finished => ConversionOutcome::Finished,
            CopyResult::Resumable => ConversionOutcome::AbortedResumeFileWritten,
            CopyResult::ResumeWriteFailed => unreachable!("handled above"),
        })
    }
}

fn alias_handle_from_path(alias_path: &str) -> String {
    alias_path.rsplit('/').next().unwrap_or(alias_path).to_string()
}

fn generate_write_handle(rng: &mut impl RandomSource) -> Result<String, ControllerError> {
    let tag = random_hex_tag(rng, 4).map_err(|_| ControllerError::CannotGenerateWriteHandle)?;
    Ok(format!("luksipc_{tag}"))
}

fn open_resume_file(path: &Path, resuming: bool) -> std::io::Result<File> {
    let file = if resuming {
        OpenOptions::new().read(true).write(true).open(path)?
    } else {
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)?
    };
    Ok(file)
}

fn plausibilize_sizes(
    read_dev_size: u64,
    write_dev_size: u64,
    chunk_size: u64,
) -> Result<(), ControllerError> {
    let abs_diff = read_dev_size.abs_diff(write_dev_size);
    if abs_diff > MAX_PLAUSIBLE_SIZE_DIFF {
        return Err(ControllerError::SizesImplausible {
            read_size: read_dev_size,
            write_size: write_dev_size,
        });
    }

    if read_dev_size > write_dev_size {
        let header_size = read_dev_size - write_dev_size;
        tracing::info!(header_size, "write disk smaller than read disk (occupied by LUKS header)");
        if header_size > chunk_size {
            return Err(ControllerError::SizesImplausible {
                read_size: read_dev_size,
                write_size: write_dev_size,
            });
        }
    } else if write_dev_size > read_dev_size {
        tracing::info!(freed = write_dev_size - read_dev_size, "write disk larger than read disk");
    } else {
        tracing::info!("write disk size equal to read disk size");
    }
    Ok(())
}

/// Best-effort: if luksFormat has already run but a later step failed,
/// restore the pre-format plaintext first chunk to raw offset 0.
fn unpulp(first_chunk: &Chunk, read_fd: &File) {
    tracing::warn!("attempting to restore original first chunk to raw device (unpulp)");
    if let Err(e) = first_chunk.write_at(read_fd, 0) {
        tracing::error!(error = %e, "unpulp failed; raw device may be left in an inconsistent state");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ConversionParametersBuilder;
    use crate::random::test_support::FixedSource;
    use crate::subprocess::test_support::FakeCommandRunner;
    use crate::subprocess::SubprocessResult;
    use std::path::PathBuf;

    fn ok() -> SubprocessResult {
        SubprocessResult {
            executed: true,
            exit_code: 0,
        }
    }

    fn scratch_device(dir: &Path, name: &str, size: u64) -> PathBuf {
        let path = dir.join(name);
        let f = File::create(&path).unwrap();
        f.set_len(size).unwrap();
        path
    }

    #[test]
    fn preconditions_fail_when_already_luks_and_safety_checks_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let raw = scratch_device(dir.path(), "raw", 20 * 1024 * 1024);

        let runner = FakeCommandRunner::new(ok()); // isLuks -> exit 0 -> "is LUKS"
        let controller = Controller::new(&runner);

        let params = ConversionParametersBuilder::new(raw)
            .backup_file(dir.path().join("backup"))
            .resume_file(dir.path().join("resume"))
            .key_file(dir.path().join("key"))
            .build()
            .unwrap();

        let err = controller.check_preconditions(&params).unwrap_err();
        assert!(matches!(err, ControllerError::Precondition(_)));
    }

    #[test]
    fn preconditions_demoted_to_warning_when_safety_checks_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let raw = scratch_device(dir.path(), "raw", 20 * 1024 * 1024);

        let runner = FakeCommandRunner::new(ok());
        let controller = Controller::new(&runner);

        let params = ConversionParametersBuilder::new(raw)
            .backup_file(dir.path().join("backup"))
            .resume_file(dir.path().join("resume"))
            .key_file(dir.path().join("key"))
            .safety_checks(false)
            .build()
            .unwrap();

        controller.check_preconditions(&params).unwrap();
    }

    #[test]
    fn convert_surfaces_alias_creation_failure_without_touching_raw_device() {
        // In this sandbox there is no real device mapper, so the alias this
        // creates can never be statted back (`/dev/mapper/alias_*` never
        // exists); `dm_create_alias`'s own post-creation size check always
        // rejects it, which `convert()` must surface as a plain error
        // rather than a panic or a silently-corrupted raw device.
        let dir = tempfile::tempdir().unwrap();
        let raw = scratch_device(dir.path(), "raw", 20 * 1024 * 1024);

        let runner = FakeCommandRunner::new(ok());
        let controller = Controller::new(&runner);
        let mut rng = FixedSource::new(vec![0x01, 0x02, 0x03, 0x04]);
        let shutdown = ShutdownFlag::bare();

        let params = ConversionParametersBuilder::new(raw.clone())
            .backup_file(dir.path().join("backup"))
            .resume_file(dir.path().join("resume"))
            .key_file(dir.path().join("key"))
            .safety_checks(false)
            .build()
            .unwrap();

        let err = controller.convert(&params, &mut rng, &shutdown).unwrap_err();
        assert!(matches!(err, ControllerError::CannotInitializeDeviceAlias(_)));
        // The raw device itself must remain untouched.
        assert_eq!(std::fs::metadata(&raw).unwrap().len(), 20 * 1024 * 1024);
    }

    #[test]
    fn plausibilize_rejects_oversized_diff() {
        let err = plausibilize_sizes(0, MAX_PLAUSIBLE_SIZE_DIFF + 1, 1024).unwrap_err();
        assert!(matches!(err, ControllerError::SizesImplausible { .. }));
    }

    #[test]
    fn plausibilize_rejects_header_larger_than_chunk_size() {
        let err = plausibilize_sizes(2048, 1024, 512).unwrap_err();
        assert!(matches!(err, ControllerError::SizesImplausible { .. }));
    }

    #[test]
    fn plausibilize_accepts_header_within_chunk_size() {
        plausibilize_sizes(2048, 1024, 2048).unwrap();
    }
}
