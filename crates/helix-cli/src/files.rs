//! Input and output files.

use std::ffi::OsString;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{CliError, ExitStatus};

pub const ENCRYPTED_SUFFIX: &str = "-encrypted";
pub const DECRYPTED_SUFFIX: &str = "-decrypted";

/// Read `path` in full. The byte count must match the size reported by the
/// file system.
pub fn read_input(path: &Path) -> Result<Vec<u8>, CliError> {
    let mut file = File::open(path).map_err(|e| {
        CliError::new(
            ExitStatus::InputName,
            format!("bad input file name '{}': {e}", path.display()),
        )
    })?;
    let expected = file
        .metadata()
        .map_err(|e| {
            CliError::new(
                ExitStatus::InputRead,
                format!("cannot stat input file '{}': {e}", path.display()),
            )
        })?
        .len();

    let mut data = Vec::new();
    file.read_to_end(&mut data).map_err(|e| {
        CliError::new(
            ExitStatus::InputRead,
            format!("could not read from input file '{}': {e}", path.display()),
        )
    })?;
    if u64::try_from(data.len()).ok() != Some(expected) {
        return Err(CliError::new(
            ExitStatus::InputReadSize,
            format!("expected {expected} bytes but read {} from input", data.len()),
        ));
    }
    debug!(path = %path.display(), bytes = data.len(), "Input read");
    Ok(data)
}

/// Create or truncate `path` and write `content` to it.
pub fn write_output(path: &Path, content: &[u8]) -> Result<(), CliError> {
    let mut file = File::create(path).map_err(|e| {
        CliError::new(
            ExitStatus::OutputName,
            format!("bad output file name '{}': {e}", path.display()),
        )
    })?;
    file.write_all(content).and_then(|()| file.flush()).map_err(|e| {
        CliError::new(
            ExitStatus::OutputWrite,
            format!("could not write to output file '{}': {e}", path.display()),
        )
    })
}

/// Output paths derive from `--output` or, failing that, the input's file
/// name in the current directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub encrypted: PathBuf,
    pub decrypted: PathBuf,
}

impl OutputPaths {
    pub fn new(input: &Path, output: Option<&Path>) -> Result<Self, CliError> {
        let base: OsString = match output {
            Some(base) => base.as_os_str().to_owned(),
            None => input
                .file_name()
                .ok_or_else(|| {
                    CliError::new(
                        ExitStatus::InputName,
                        format!("input '{}' has no file name", input.display()),
                    )
                })?
                .to_owned(),
        };
        Ok(Self {
            encrypted: with_suffix(&base, ENCRYPTED_SUFFIX),
            decrypted: with_suffix(&base, DECRYPTED_SUFFIX),
        })
    }
}

fn with_suffix(base: &OsString, suffix: &str) -> PathBuf {
    let mut name = base.clone();
    name.push(suffix);
    PathBuf::from(name)
}
