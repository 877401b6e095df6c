//! Stable termination codes and the internal error taxonomy that maps onto them.

use thiserror::Error;

/// Process-wide termination code. Numeric values are part of the public
/// interface: scripts wrapping this tool may switch on the exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    UnspecifiedError = 1,
    CopyAbortedResumeFileWritten = 2,
    CannotAllocateChunkMemory = 3,
    CannotGenerateKeyFile = 4,
    CannotInitializeDeviceAlias = 5,
    CannotOpenReadDevice = 6,
    CannotOpenResumeFile = 7,
    CopyAbortedFailedToWriteResumeFile = 8,
    DeviceSizesImplausible = 9,
    FailedToBackupHeader = 10,
    FailedToCloseLuksDevice = 11,
    FailedToOpenUnlockedCryptoDevice = 12,
    FailedToPerformLuksFormat = 13,
    FailedToPerformLuksOpen = 14,
    FailedToReadResumeFile = 15,
    FailedToRemoveDeviceMapperAlias = 16,
    WriteDeviceHandleUnavailable = 17,
    PreconditionsNotSatisfied = 18,
    UnableToGetRawDiskSize = 19,
    UnableToReadFirstChunk = 20,
    UnableToReadFromStdin = 21,
    UnsupportedSmallDiskCornerCase = 22,
    UserAbortedProcess = 23,
    CannotInitSignalHandlers = 24,
    CmdlineParsingError = 25,
    CmdlineArgumentError = 26,
    CannotGenerateWriteHandle = 27,
    PrngInitializationFailed = 28,
}

impl ExitCode {
    /// Human-readable description, suitable for a final log line before exit.
    pub fn description(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::UnspecifiedError => "Unspecified error",
            Self::CopyAbortedResumeFileWritten => {
                "Copy aborted gracefully, resume file successfully written"
            }
            Self::CannotAllocateChunkMemory => "Cannot allocate memory for copy chunks",
            Self::CannotGenerateKeyFile => "Cannot generate key file",
            Self::CannotInitializeDeviceAlias => "Cannot initialize device mapper alias",
            Self::CannotOpenReadDevice => "Cannot open reading block device",
            Self::CannotOpenResumeFile => "Cannot open resume file",
            Self::CopyAbortedFailedToWriteResumeFile => {
                "Copy aborted, failed to write resume file"
            }
            Self::DeviceSizesImplausible => "Device sizes are implausible",
            Self::FailedToBackupHeader => "Failed to backup raw device header",
            Self::FailedToCloseLuksDevice => "Failed to close LUKS device",
            Self::FailedToOpenUnlockedCryptoDevice => "Failed to open unlocked crypto device",
            Self::FailedToPerformLuksFormat => "Failed to perform luksFormat",
            Self::FailedToPerformLuksOpen => "Failed to perform luksOpen",
            Self::FailedToReadResumeFile => "Failed to read resume file",
            Self::FailedToRemoveDeviceMapperAlias => "Failed to remove device mapper alias",
            Self::WriteDeviceHandleUnavailable => {
                "Device mapper handle for luksipc write device is unavailable"
            }
            Self::PreconditionsNotSatisfied => "Process preconditions are unsatisfied",
            Self::UnableToGetRawDiskSize => "Unable to determine raw disk size",
            Self::UnableToReadFirstChunk => "Unable to read first chunk",
            Self::UnableToReadFromStdin => "Unable to read from standard input",
            Self::UnsupportedSmallDiskCornerCase => "Unsupported small disk corner case",
            Self::UserAbortedProcess => "User aborted process",
            Self::CannotInitSignalHandlers => "Unable to install signal handlers",
            Self::CmdlineParsingError => "Error parsing the command line parameters",
            Self::CmdlineArgumentError => "Error with a parameter given on the command line",
            Self::CannotGenerateWriteHandle => "Error generating device mapper write handle",
            Self::PrngInitializationFailed => "Initialization of PRNG failed",
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("requested read of {requested} bytes exceeds chunk capacity {capacity}")]
    ExceedsCapacity { requested: usize, capacity: usize },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ResumeError {
    #[error("resume file magic does not match; not a luksipc resume file")]
    BadMagic,
    #[error("resume record reports read device size {recorded} but current device reports {actual}")]
    ReadDeviceSizeMismatch { recorded: u64, actual: u64 },
    #[error("resume record reports write device size {recorded} but current device reports {actual}")]
    WriteDeviceSizeMismatch { recorded: u64, actual: u64 },
    #[error("resume record reports reluksifying={recorded} but current run has reluksifying={actual}")]
    ReluksifyingMismatch { recorded: bool, actual: bool },
    #[error("active_used {active_used} exceeds chunk size {chunk_size}")]
    ActiveUsedExceedsChunkSize { active_used: u32, chunk_size: usize },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("argument count {count} exceeds maximum of {max}")]
    TooManyArguments { count: usize, max: usize },
    #[error("failed to spawn subprocess: {0}")]
    Spawn(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum LuksDmError {
    #[error("device size {size} is not a multiple of 512-byte sectors")]
    SizeNotSectorAligned { size: u64 },
    #[error("dmsetup remove did not succeed after {attempts} attempts")]
    RemoveRetriesExhausted { attempts: u32 },
    #[error(transparent)]
    Subprocess(#[from] SubprocessError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("chunk size {0} is below the minimum of {1} bytes")]
    ChunkSizeTooSmall(u64, u64),
    #[error("raw device path must not be empty")]
    EmptyDevicePath,
    #[error("luks-format argument list entry is empty")]
    EmptyLuksParam,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error(transparent)]
    Resume(#[from] ResumeError),
    #[error(transparent)]
    Params(#[from] ParamsError),
    #[error("read device is smaller than one chunk; unsupported small disk corner case")]
    SmallDiskCornerCase,
    #[error("device mapper write handle {0} is unavailable")]
    WriteHandleUnavailable(String),
    #[error("device sizes are implausible: read={read_size} write={write_size}")]
    SizesImplausible { read_size: u64, write_size: u64 },
    #[error("failed to generate a random device mapper write handle")]
    CannotGenerateWriteHandle,
    #[error("failed to install signal handlers: {0}")]
    CannotInitSignalHandlers(String),
    #[error("failed to create device mapper alias for raw device: {0}")]
    CannotInitializeDeviceAlias(#[source] LuksDmError),
    #[error("failed to open reading device: {0}")]
    CannotOpenReadDevice(String),
    #[error("failed to open resume file: {0}")]
    CannotOpenResumeFile(#[source] std::io::Error),
    #[error("unable to determine size of raw disk")]
    UnableToGetRawDiskSize,
    #[error("unable to read first chunk from reading device")]
    UnableToReadFirstChunk,
    #[error("failed to backup raw device header: {0}")]
    FailedToBackupHeader(#[source] std::io::Error),
    #[error("failed to perform luksFormat: {0}")]
    FailedToPerformLuksFormat(#[source] LuksDmError),
    #[error("failed to perform luksOpen")]
    FailedToPerformLuksOpen,
    #[error("failed to open unlocked crypto device: {0}")]
    FailedToOpenUnlockedCryptoDevice(String),
    #[error("failed to close LUKS device: {0}")]
    FailedToCloseLuksDevice(#[source] LuksDmError),
    #[error("failed to remove device mapper alias: {0}")]
    FailedToRemoveDeviceMapperAlias(#[source] LuksDmError),
}

impl ControllerError {
    /// Map an internal error onto the stable exit code a caller should use.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            Self::Precondition(_) => ExitCode::PreconditionsNotSatisfied,
            Self::Chunk(_) => ExitCode::UnableToReadFirstChunk,
            Self::Resume(_) => ExitCode::FailedToReadResumeFile,
            Self::Params(_) => ExitCode::CmdlineArgumentError,
            Self::SmallDiskCornerCase => ExitCode::UnsupportedSmallDiskCornerCase,
            Self::WriteHandleUnavailable(_) => ExitCode::WriteDeviceHandleUnavailable,
            Self::SizesImplausible { .. } => ExitCode::DeviceSizesImplausible,
            Self::CannotGenerateWriteHandle => ExitCode::CannotGenerateWriteHandle,
            Self::CannotInitSignalHandlers(_) => ExitCode::CannotInitSignalHandlers,
            Self::CannotInitializeDeviceAlias(_) => ExitCode::CannotInitializeDeviceAlias,
            Self::CannotOpenReadDevice(_) => ExitCode::CannotOpenReadDevice,
            Self::CannotOpenResumeFile(_) => ExitCode::CannotOpenResumeFile,
            Self::UnableToGetRawDiskSize => ExitCode::UnableToGetRawDiskSize,
            Self::UnableToReadFirstChunk => ExitCode::UnableToReadFirstChunk,
            Self::FailedToBackupHeader(_) => ExitCode::FailedToBackupHeader,
            Self::FailedToPerformLuksFormat(_) => ExitCode::FailedToPerformLuksFormat,
            Self::FailedToPerformLuksOpen => ExitCode::FailedToPerformLuksOpen,
            Self::FailedToOpenUnlockedCryptoDevice(_) => ExitCode::FailedToOpenUnlockedCryptoDevice,
            Self::FailedToCloseLuksDevice(_) => ExitCode::FailedToCloseLuksDevice,
            Self::FailedToRemoveDeviceMapperAlias(_) => ExitCode::FailedToRemoveDeviceMapperAlias,
        }
    }
}
