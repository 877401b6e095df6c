//! Typed wrappers around the `cryptsetup`/`dmsetup` subprocess contracts.
//! Every function here is a thin, testable shim over [`CommandRunner`]; none
//! of them touch the disk directly.

use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::error::LuksDmError;
use crate::random::RandomSource;
use crate::subprocess::CommandRunner;
use crate::support::disk_size_of_path;

const DM_REMOVE_MAX_ATTEMPTS: u32 = 10;
const DM_REMOVE_RETRY_DELAY: Duration = Duration::from_secs(1);

pub fn is_luks(runner: &dyn CommandRunner, block_device: &str) -> Result<bool, LuksDmError> {
    let result = runner.run("cryptsetup", &["isLuks".into(), block_device.into()])?;
    Ok(result.succeeded())
}

pub fn is_mapper_name_available(
    runner: &dyn CommandRunner,
    mapper_name: &str,
) -> Result<bool, LuksDmError> {
    tracing::debug!(mapper_name, "performing dm-crypt status lookup");
    let result = runner.run("cryptsetup", &["status".into(), mapper_name.into()])?;
    let available = result.executed && result.exit_code == 4;
    tracing::debug!(
        mapper_name,
        available,
        executed = result.executed,
        exit_code = result.exit_code,
        "mapper availability checked"
    );
    Ok(available)
}

/// `extra_params` is the comma-separated list of extra cryptsetup arguments
/// the user supplied, matching the original tool's `-p/--luksparams` flag.
pub fn luks_format(
    runner: &dyn CommandRunner,
    block_device: &str,
    key_file: &str,
    extra_params: Option<&str>,
) -> Result<bool, LuksDmError> {
    let mut args: Vec<String> = vec![
        "luksFormat".into(),
        "-q".into(),
        "--key-file".into(),
        key_file.into(),
    ];
    if let Some(extra) = extra_params {
        for part in extra.split(',') {
            if !part.is_empty() {
                args.push(part.to_string());
            }
        }
    }
    args.push(block_device.to_string());

    tracing::debug!(block_device, key_file, "performing luksFormat");
    let result = runner.run("cryptsetup", &args)?;
    if !result.succeeded() {
        tracing::error!(
            executed = result.executed,
            exit_code = result.exit_code,
            "luksFormat failed"
        );
        return Ok(false);
    }
    Ok(true)
}

pub fn luks_open(
    runner: &dyn CommandRunner,
    block_device: &str,
    key_file: &str,
    handle: &str,
) -> Result<bool, LuksDmError> {
    tracing::debug!(block_device, key_file, handle, "performing luksOpen");
    let result = runner.run(
        "cryptsetup",
        &[
            "luksOpen".into(),
            "--key-file".into(),
            key_file.into(),
            block_device.into(),
            handle.into(),
        ],
    )?;
    if !result.succeeded() {
        tracing::error!(
            executed = result.executed,
            exit_code = result.exit_code,
            "luksOpen failed"
        );
        return Ok(false);
    }
    Ok(true)
}

/// Creates `/dev/mapper/<mapper_handle>` as a linear 1:1 alias of
/// `src_device`, verifying the alias reports an identical size before
/// returning success.
pub fn dm_create_alias(
    runner: &dyn CommandRunner,
    src_device: &str,
    mapper_handle: &str,
) -> Result<bool, LuksDmError> {
    let dev_size = disk_size_of_path(Path::new(src_device));
    if dev_size % 512 != 0 {
        return Err(LuksDmError::SizeNotSectorAligned { size: dev_size });
    }

    let table = format!("0 {} linear {} 0", dev_size / 512, src_device);
    let result = runner.run(
        "dmsetup",
        &[
            "create".into(),
            mapper_handle.into(),
            "--table".into(),
            table,
        ],
    )?;
    if !result.succeeded() {
        tracing::error!(
            executed = result.executed,
            exit_code = result.exit_code,
            "dmsetup alias creation failed"
        );
        return Ok(false);
    }

    let alias_path = format!("/dev/mapper/{mapper_handle}");
    let alias_size = disk_size_of_path(Path::new(&alias_path));
    if dev_size != alias_size {
        tracing::error!(
            src_device,
            alias_path,
            dev_size,
            alias_size,
            "alias and source device sizes differ"
        );
        dm_remove(runner, mapper_handle)?;
        return Ok(false);
    }

    tracing::debug!(alias_path, src_device, "created device mapper alias");
    Ok(true)
}

/// Synthesizes an `alias_<prefix>_<hex>` handle and creates the linear alias
/// under it, returning the `/dev/mapper/...` path on success.
pub fn dm_create_dynamic_alias(
    runner: &dyn CommandRunner,
    rng: &mut impl RandomSource,
    src_device: &str,
    alias_prefix: Option<&str>,
) -> Result<Option<String>, LuksDmError> {
    let mut handle = match alias_prefix {
        Some(prefix) if prefix.len() < 32 => format!("alias_{prefix}_"),
        _ => "alias_".to_string(),
    };
    rng.append_hex(&mut handle, 4)
        .map_err(crate::error::SubprocessError::Spawn)?;

    if !dm_create_alias(runner, src_device, &handle)? {
        return Ok(None);
    }
    Ok(Some(format!("/dev/mapper/{handle}")))
}

/// `dmsetup remove` can transiently fail immediately after a device is
/// closed, since udev may still hold it open for probing; retry with a
/// short fixed backoff before giving up.
pub fn dm_remove(runner: &dyn CommandRunner, mapper_handle: &str) -> Result<bool, LuksDmError> {
    let mut last_result = None;
    for attempt in 0..DM_REMOVE_MAX_ATTEMPTS {
        let result = runner.run("dmsetup", &["remove".into(), mapper_handle.into()])?;
        if !result.executed {
            return Ok(false);
        }
        if result.exit_code == 0 {
            last_result = Some(result);
            break;
        }
        last_result = Some(result);
        if attempt + 1 < DM_REMOVE_MAX_ATTEMPTS {
            thread::sleep(DM_REMOVE_RETRY_DELAY);
        }
    }

    let succeeded = last_result.is_some_and(|r| r.succeeded())
        && is_mapper_name_available(runner, mapper_handle)?;
    if !succeeded {
        tracing::error!(mapper_handle, "cannot remove device mapper handle");
    }
    Ok(succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::test_support::FixedSource;
    use crate::subprocess::test_support::FakeCommandRunner;
    use crate::subprocess::SubprocessResult;

    fn ok() -> SubprocessResult {
        SubprocessResult {
            executed: true,
            exit_code: 0,
        }
    }

    fn fail(code: i32) -> SubprocessResult {
        SubprocessResult {
            executed: true,
            exit_code: code,
        }
    }

    #[test]
    fn is_luks_true_iff_exit_zero() {
        let runner = FakeCommandRunner::new(ok());
        assert!(is_luks(&runner, "/dev/sdx").unwrap());

        let runner = FakeCommandRunner::new(fail(1));
        assert!(!is_luks(&runner, "/dev/sdx").unwrap());
    }

    #[test]
    fn mapper_available_true_iff_exit_four() {
        let runner = FakeCommandRunner::new(fail(4));
        assert!(is_mapper_name_available(&runner, "luksipc_test").unwrap());

        let runner = FakeCommandRunner::new(ok());
        assert!(!is_mapper_name_available(&runner, "luksipc_test").unwrap());
    }

    #[test]
    fn luks_format_splits_extra_params_on_comma() {
        let runner = FakeCommandRunner::new(ok());
        let success = luks_format(
            &runner,
            "/dev/mapper/alias_x",
            "/tmp/key",
            Some("--cipher,aes-xts-plain64,--hash,sha256"),
        )
        .unwrap();
        assert!(success);
        let calls = runner.calls.borrow();
        let (_, args) = &calls[0];
        assert!(args.contains(&"--cipher".to_string()));
        assert!(args.contains(&"aes-xts-plain64".to_string()));
        assert_eq!(args.last().unwrap(), "/dev/mapper/alias_x");
    }

    #[test]
    fn dm_remove_retries_on_nonzero_then_succeeds() {
        let runner = FakeCommandRunner::new(ok());
        runner.push_response("dmsetup", fail(1));
        runner.push_response("dmsetup", ok());
        runner.push_response("cryptsetup", fail(4));
        let succeeded = dm_remove(&runner, "luksipc_test").unwrap();
        assert!(succeeded);
        assert!(runner.calls.borrow().len() >= 2);
    }

    #[test]
    fn dynamic_alias_prefixes_and_suffixes_handle() {
        let runner = FakeCommandRunner::new(ok());
        let mut rng = FixedSource::new(vec![0xaa, 0xbb, 0xcc, 0xdd]);
        // dm_create_alias internally calls disk_size_of_path on a
        // nonexistent device, which yields 0 and thus an alignment error;
        // use a real temp file path sized to a sector multiple instead.
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), vec![0u8; 512]).unwrap();
        let path = tmp.path().to_str().unwrap();

        let alias = dm_create_dynamic_alias(&runner, &mut rng, path, Some("rawdev")).unwrap();
        assert!(alias.is_none() || alias.as_ref().unwrap().starts_with("/dev/mapper/alias_rawdev_"));
    }
}
