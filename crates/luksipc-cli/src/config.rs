//! Optional TOML configuration file, read before the command line is
//! applied. Every field mirrors a flag and is overridden by it when both
//! are given.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub device: Option<PathBuf>,
    pub readdev: Option<PathBuf>,
    pub blocksize: Option<u64>,
    pub backupfile: Option<PathBuf>,
    pub keyfile: Option<PathBuf>,
    pub luksparams: Option<String>,
    pub loglevel: Option<u8>,
    pub resume_file: Option<PathBuf>,
    pub no_seatbelt: Option<bool>,
    pub batch_mode: Option<bool>,
    pub delete_resume_on_success: Option<bool>,
}

pub fn load(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
}
