//! Core engine for converting a plaintext block device into a LUKS
//! container in place, crash-resumably, without a second device of
//! comparable size.
//!
//! This crate owns no process-exit policy and never reads argv; the CLI
//! binary translates user input into [`params::ConversionParameters`] and
//! interprets [`error::ControllerError::exit_code`] for the caller.

pub mod backup;
pub mod chunk;
pub mod controller;
pub mod copy_engine;
pub mod error;
pub mod keyfile;
pub mod luksdm;
pub mod mount;
pub mod params;
pub mod random;
pub mod resume;
pub mod signal;
pub mod stats;
pub mod subprocess;
pub mod support;

pub use controller::{Controller, ConversionOutcome};
pub use error::{ControllerError, ExitCode};
pub use params::{ConversionParameters, ConversionParametersBuilder};
pub use random::{RandomSource, UrandomSource};
pub use signal::ShutdownFlag;
pub use subprocess::{CommandRunner, RealCommandRunner};
