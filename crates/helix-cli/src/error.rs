//! Exit codes and the CLI error type.

use helix_client::{AuthError, Error, StartupError};

/// Process exit status. The numbering is stable; scripts depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExitStatus {
    Syntax = 1,
    InputName = 2,
    InputRead = 3,
    InputReadSize = 4,
    OutputName = 6,
    OutputWrite = 7,
    Module = 8,
    Server = 9,
    AccountCreate = 10,
    AccountLogin = 11,
    EncryptRecipient = 12,
    EncryptEmpty = 13,
    DecryptStatus = 14,
    DecryptEmpty = 15,
    DecryptSize = 16,
    Account = 17,
    ArgParse = 18,
    OwnershipViolation = 19,
}

impl ExitStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// A failure that ends the run with a specific [`ExitStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub status: ExitStatus,
    pub message: String,
}

impl CliError {
    pub fn new(status: ExitStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Classify a client error. `fallback` is used for failures specific to
    /// the step that produced `err`.
    pub fn from_client(err: &Error, fallback: ExitStatus) -> Self {
        let status = match err {
            Error::Ownership(_) => ExitStatus::OwnershipViolation,
            Error::Connection(_) => ExitStatus::Server,
            Error::Startup(StartupError::ModuleStartup(_)) => ExitStatus::Module,
            Error::Startup(_) => ExitStatus::Syntax,
            Error::Auth(AuthError::AccountCreateFailed { .. }) => ExitStatus::AccountCreate,
            Error::Auth(AuthError::AccountLoginFailed { .. }) => ExitStatus::AccountLogin,
            Error::Auth(_) => ExitStatus::Account,
            Error::Resolution(_) | Error::Crypto(_) => fallback,
        };
        Self::new(status, err.to_string())
    }
}
