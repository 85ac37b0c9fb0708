//! Client error taxonomy.
//!
//! Each failure family has its own enum so callers can match on exactly the
//! cases an operation can produce. [`Error`] wraps them all and reports a
//! coarse [`ErrorCategory`] for exit-code style mapping.

use std::time::Duration;

use crate::promise::{PromiseId, PromiseKind};
use crate::status::PromiseStatus;

/// Result type alias using the client [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Module failed to start.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid server address {0:?}: must be 1-127 characters")]
    InvalidServerAddress(String),

    #[error("Invalid server port {0}: must be between 1 and 65534")]
    InvalidPort(u16),

    #[error("Module startup failed: {0}")]
    ModuleStartup(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("Not connected to the key server")]
    NotConnected,

    #[error("Key server {address} unreachable: {reason}")]
    ServerUnreachable { address: String, reason: String },

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Connection closed")]
    Closed,

    #[error("Key server did not answer within {0:?}")]
    Timeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid account name {0:?}")]
    InvalidAccountName(String),

    #[error("No account is logged in")]
    NotLoggedIn,

    #[error("Account {name} could not be created: {reason}")]
    AccountCreateFailed { name: String, reason: String },

    #[error("Account {name} could not log in: {reason}")]
    AccountLoginFailed { name: String, reason: String },

    #[error("Account {name} could not be deleted: {reason}")]
    AccountDeleteFailed { name: String, reason: String },
}

/// Recipient lookup failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("No account matches {0}")]
    NotFound(String),

    #[error("Search for {query} timed out after {after:?}")]
    Timeout { query: String, after: Duration },

    #[error("Search has not resolved (status {0})")]
    Unresolved(PromiseStatus),

    #[error("Search failed: {0}")]
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoOperationError {
    #[error("Operation has no data available (status {status}){}", reason_suffix(.reason))]
    InvalidStatus {
        status: PromiseStatus,
        reason: Option<String>,
    },

    #[error("Operation produced an empty result")]
    EmptyResult,

    #[error("Result is {actual} bytes, expected {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Crypto operation failed: {0}")]
    Failed(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    reason.as_ref().map(|r| format!(": {r}")).unwrap_or_default()
}

/// The caller broke the handle contract.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnershipViolation {
    #[error("Unknown promise handle {0}")]
    UnknownHandle(PromiseId),

    #[error("Promise handle {0} was already released")]
    StaleHandle(PromiseId),

    #[error("Output of promise {0} was already taken")]
    OutputAlreadyTaken(PromiseId),

    #[error("Promise {id} is a {actual} promise, expected {expected}")]
    WrongKind {
        id: PromiseId,
        expected: &'static str,
        actual: PromiseKind,
    },
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Lifecycle,
    Connection,
    Auth,
    Resolution,
    Crypto,
    Ownership,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Startup(#[from] StartupError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Crypto(#[from] CryptoOperationError),

    #[error(transparent)]
    Ownership(#[from] OwnershipViolation),
}

impl Error {
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Startup(_) => ErrorCategory::Lifecycle,
            Self::Connection(_) => ErrorCategory::Connection,
            Self::Auth(_) => ErrorCategory::Auth,
            Self::Resolution(_) => ErrorCategory::Resolution,
            Self::Crypto(_) => ErrorCategory::Crypto,
            Self::Ownership(_) => ErrorCategory::Ownership,
        }
    }

    pub const fn is_ownership_violation(&self) -> bool {
        matches!(self, Self::Ownership(_))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_the_wrapped_family() {
        let cases: [(Error, ErrorCategory); 6] = [
            (
                StartupError::InvalidPort(0).into(),
                ErrorCategory::Lifecycle,
            ),
            (ConnectionError::NotConnected.into(), ErrorCategory::Connection),
            (AuthError::NotLoggedIn.into(), ErrorCategory::Auth),
            (
                ResolutionError::NotFound("name \"x\"".into()).into(),
                ErrorCategory::Resolution,
            ),
            (CryptoOperationError::EmptyResult.into(), ErrorCategory::Crypto),
            (
                OwnershipViolation::StaleHandle(PromiseId::from_raw(1)).into(),
                ErrorCategory::Ownership,
            ),
        ];
        for (err, category) in cases {
            assert_eq!(err.category(), category, "{err}");
        }
    }

    #[test]
    fn invalid_status_message_includes_reason() {
        let err = CryptoOperationError::InvalidStatus {
            status: PromiseStatus::failed(false),
            reason: Some("bad tag".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("RESULT_ERROR"));
        assert!(msg.ends_with(": bad tag"));
    }

    #[test]
    fn wrapped_errors_display_transparently() {
        let err: Error = ConnectionError::Closed.into();
        assert_eq!(err.to_string(), "Connection closed");
        assert!(!err.is_ownership_violation());
    }
}
