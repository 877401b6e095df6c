//! CLI front-end: turns command line flags (and, optionally, a config
//! file) into [`luksipc_core::ConversionParameters`], walks the user
//! through the interactive safety checklist, then hands off to the core
//! controller.

mod config;

use std::io::{self, Write as _};
use std::path::PathBuf;
use std::process::ExitCode as ProcessExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use luksipc_core::keyfile::gen_keyfile;
use luksipc_core::params::MIN_CHUNK_SIZE;
use luksipc_core::support::disk_size_of_path;
use luksipc_core::{
    Controller, ConversionOutcome, ConversionParameters, ConversionParametersBuilder,
    ExitCode as LuksipcExitCode, RealCommandRunner, ShutdownFlag, UrandomSource,
};

/// Convert a block device to LUKS-encrypted in place, without a second
/// device of comparable size.
#[derive(Parser)]
#[command(name = "luksipc", author, version, about)]
#[command(after_help = "EXAMPLES:
    luksipc -d /dev/sda9
        Converts /dev/sda9 to a LUKS partition with default parameters.

    luksipc -d /dev/sda9 --resume --resume-file /root/resume.bin
        Resumes a crashed conversion using a previously written resume file.

    luksipc -d /dev/sda9 --readdev /dev/mapper/oldluks
        reLUKSifies an already-unlocked LUKS container, for example to
        change its cipher or bulk encryption key.
")]
struct Cli {
    /// Raw device that luksFormat will be called on.
    #[arg(short = 'd', long = "device", env = "LUKSIPC_DEVICE")]
    device: Option<PathBuf>,

    /// Device to read unencrypted data from, if different from --device
    /// (set this to reLUKSify an already-unlocked container).
    #[arg(long = "readdev", env = "LUKSIPC_READDEV")]
    readdev: Option<PathBuf>,

    /// Copy block size in bytes; rounded up to the nearest 4096 bytes and
    /// never below 10 MiB.
    #[arg(short = 'b', long = "blocksize", env = "LUKSIPC_BLOCKSIZE")]
    blocksize: Option<u64>,

    /// File to write the raw device's header backup to.
    #[arg(short = 'c', long = "backupfile", env = "LUKSIPC_BACKUPFILE")]
    backupfile: Option<PathBuf>,

    /// File to generate the initial LUKS keyfile at.
    #[arg(short = 'k', long = "keyfile", env = "LUKSIPC_KEYFILE")]
    keyfile: Option<PathBuf>,

    /// Comma-separated extra arguments passed to luksFormat.
    #[arg(short = 'p', long = "luksparams", env = "LUKSIPC_LUKSPARAMS")]
    luksparams: Option<String>,

    /// Logging verbosity, 0 (critical) through 4 (debug).
    #[arg(
        short = 'l',
        long = "loglevel",
        env = "LUKSIPC_LOGLEVEL",
        value_parser = clap::value_parser!(u8).range(0..=4)
    )]
    loglevel: Option<u8>,

    /// Resume a previously aborted conversion.
    #[arg(long = "resume")]
    resume: bool,

    /// File resume information is read from and written to.
    #[arg(long = "resume-file", env = "LUKSIPC_RESUME_FILE")]
    resume_file: Option<PathBuf>,

    /// Disable safety checks that exist to keep you from losing data.
    #[arg(long = "no-seatbelt")]
    no_seatbelt: bool,

    /// Batch mode: perform no interactive confirmation.
    #[arg(long = "i-know-what-im-doing")]
    batch_mode: bool,

    /// Delete the resume file once the conversion finishes successfully.
    #[arg(long = "delete-resume-on-success")]
    delete_resume_on_success: bool,

    /// Load defaults from a TOML configuration file; flags still override it.
    #[arg(long = "config", value_name = "FILE", env = "LUKSIPC_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> ProcessExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => ProcessExitCode::from(code.code() as u8),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ProcessExitCode::from(LuksipcExitCode::UnspecifiedError.code() as u8)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<LuksipcExitCode> {
    let file_config = match &cli.config {
        Some(path) => config::load(path)?,
        None => config::FileConfig::default(),
    };

    let loglevel = cli.loglevel.or(file_config.loglevel).unwrap_or(3);
    setup_tracing(loglevel);

    let device = cli
        .device
        .or(file_config.device)
        .context("no device to convert was given (use -d/--device or a config file)")?;

    let mut builder = ConversionParametersBuilder::new(device);

    if let Some(readdev) = cli.readdev.or(file_config.readdev) {
        builder = builder.read_device(readdev);
    }
    if let Some(blocksize) = cli.blocksize.or(file_config.blocksize) {
        builder = builder.chunk_size(blocksize);
    } else {
        builder = builder.chunk_size(MIN_CHUNK_SIZE);
    }
    if let Some(backupfile) = cli.backupfile.or(file_config.backupfile) {
        builder = builder.backup_file(backupfile);
    }
    if let Some(keyfile) = cli.keyfile.or(file_config.keyfile) {
        builder = builder.key_file(keyfile);
    }
    if let Some(resume_file) = cli.resume_file.or(file_config.resume_file) {
        builder = builder.resume_file(resume_file);
    }
    let luksparams = cli.luksparams.or(file_config.luksparams);
    builder = builder.luks_format_params(luksparams);

    let no_seatbelt = cli.no_seatbelt || file_config.no_seatbelt.unwrap_or(false);
    let batch_mode = cli.batch_mode || file_config.batch_mode.unwrap_or(false);
    let delete_resume_on_success =
        cli.delete_resume_on_success || file_config.delete_resume_on_success.unwrap_or(false);

    builder = builder
        .safety_checks(!no_seatbelt)
        .batch_mode(batch_mode)
        .resuming(cli.resume)
        .delete_resume_on_success(delete_resume_on_success);

    let params = builder.build().context("invalid conversion parameters")?;

    let runner = RealCommandRunner::new(loglevel >= 4);
    let controller = Controller::new(&runner);

    if let Err(e) = controller.check_preconditions(&params) {
        let code = e.exit_code();
        eprintln!("Error: {e}");
        return Ok(code);
    }

    if let Err(code) = ask_user_confirmation(&params) {
        return Ok(code);
    }

    let mut rng = UrandomSource::open().context("initializing PRNG")?;

    if !params.resuming {
        if let Err(e) = gen_keyfile(&params.key_file, !params.safety_checks, &mut rng) {
            eprintln!("Error: key generation failed: {e}");
            return Ok(LuksipcExitCode::CannotGenerateKeyFile);
        }
    }

    let shutdown = match ShutdownFlag::install() {
        Ok(flag) => flag,
        Err(e) => {
            eprintln!("Error: unable to install signal handlers: {e}");
            return Ok(LuksipcExitCode::CannotInitSignalHandlers);
        }
    };

    match controller.convert(&params, &mut rng, &shutdown) {
        Ok(ConversionOutcome::Finished) => {
            tracing::info!("conversion finished successfully");
            Ok(LuksipcExitCode::Success)
        }
        Ok(ConversionOutcome::AbortedResumeFileWritten) => {
            tracing::warn!("copy aborted, resume file written; rerun with --resume to continue");
            Ok(LuksipcExitCode::CopyAbortedResumeFileWritten)
        }
        Ok(ConversionOutcome::AbortedResumeFileWriteFailed) => {
            tracing::error!("copy aborted and the resume file could not be written; the device may be left in an inconsistent state");
            Ok(LuksipcExitCode::CopyAbortedFailedToWriteResumeFile)
        }
        Err(e) => {
            eprintln!("Error: {e}");
            Ok(e.exit_code())
        }
    }
}

/// Walks the user through the same checklist the original tool prints,
/// skipped entirely in batch mode.
fn ask_user_confirmation(params: &ConversionParameters) -> Result<(), LuksipcExitCode> {
    if params.batch_mode {
        return Ok(());
    }

    let dev_size = disk_size_of_path(&params.raw_device);
    if dev_size == 0 {
        eprintln!("{}: cannot determine disk size.", params.raw_device.display());
        return Err(LuksipcExitCode::UnableToGetRawDiskSize);
    }

    eprintln!("WARNING! luksipc will perform the following actions:");
    match (params.reluksifying, params.resuming) {
        (false, false) => {
            eprintln!("   => Normal LUKSification of plain device {}", params.raw_device.display());
            eprintln!("   -> luksFormat will be performed on {}", params.raw_device.display());
        }
        (false, true) => {
            eprintln!(
                "   => Resume LUKSification of (partially encrypted) plain device {}",
                params.raw_device.display()
            );
            eprintln!("   -> Using the information in resume file {}", params.resume_file.display());
        }
        (true, false) => {
            eprintln!("   => reLUKSification of LUKS device {}", params.raw_device.display());
            eprintln!("   -> Which has been unlocked at {}", params.read_device.display());
            eprintln!("   -> luksFormat will be performed on {}", params.raw_device.display());
        }
        (true, true) => {
            eprintln!(
                "   => Resume reLUKSification of (partially re-encrypted) LUKS device {}",
                params.raw_device.display()
            );
            eprintln!("   -> Which has been unlocked with the OLD key at {}", params.read_device.display());
            eprintln!("   -> Using the information in resume file {}", params.resume_file.display());
        }
    }
    eprintln!();

    eprintln!("Please confirm you have completed the checklist:");
    let mut checkpoint = 0;
    if !params.resuming {
        print_checklist_item(&mut checkpoint, "You have resized the contained filesystem(s) appropriately");
        print_checklist_item(&mut checkpoint, "You have unmounted any contained filesystem(s)");
        print_checklist_item(
            &mut checkpoint,
            &format!(
                "You will ensure secure storage of the keyfile that will be generated at {}",
                params.key_file.display()
            ),
        );
    } else {
        print_checklist_item(
            &mut checkpoint,
            &format!(
                "The resume file {} belongs to the partially encrypted volume {}",
                params.resume_file.display(),
                params.raw_device.display()
            ),
        );
    }
    print_checklist_item(&mut checkpoint, "Power conditions are satisfied (i.e. your laptop is not running off battery)");
    if !params.resuming {
        print_checklist_item(
            &mut checkpoint,
            &format!("You have a backup of all important data on {}", params.raw_device.display()),
        );
    }

    eprintln!();
    eprintln!(
        "    {}: {} MiB = {:.1} GiB",
        params.raw_device.display(),
        dev_size / 1024 / 1024,
        (dev_size / 1024 / 1024) as f64 / 1024.0
    );
    eprintln!("    Chunk size: {} bytes = {:.1} MiB", params.chunk_size, params.chunk_size as f64 / 1024.0 / 1024.0);
    eprintln!("    Keyfile: {}", params.key_file.display());
    eprintln!(
        "    LUKS format parameters: {}",
        params.luks_format_params.as_deref().unwrap_or("None given")
    );
    eprintln!();
    eprint!("Are all these conditions satisfied, then answer uppercase yes: ");
    io::stderr().flush().ok();

    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return Err(LuksipcExitCode::UnableToReadFromStdin);
    }
    if answer.trim_end_matches(['\n', '\r']) != "YES" {
        eprintln!("Wrong answer. Aborting.");
        return Err(LuksipcExitCode::UserAbortedProcess);
    }
    Ok(())
}

fn print_checklist_item(checkpoint: &mut u32, message: &str) {
    *checkpoint += 1;
    eprintln!("  {}. {}", checkpoint, message);
}

fn setup_tracing(loglevel: u8) {
    let filter = match loglevel {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(io::stderr)
        .init();
}
