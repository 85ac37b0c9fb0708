//! Local account records.
//!
//! Every account this device has provisioned keeps its identity secret under
//! `<data_dir>/devices/<device_id>/accounts/<sha256(name)>.key`. The file
//! name is the hex digest of the account name, so every valid name maps to a
//! safe file name of the same length.

use std::path::{Path, PathBuf};

use helix_crypto::{CryptoError, IdentityKeyPair, sha256_hex};
use tracing::debug;

use crate::error::AuthError;

pub const MAX_ACCOUNT_NAME_LEN: usize = 128;

/// Reject empty names, names with whitespace, and names over
/// [`MAX_ACCOUNT_NAME_LEN`] characters.
pub fn validate_account_name(name: &str) -> Result<(), AuthError> {
    if name.is_empty()
        || name.chars().count() > MAX_ACCOUNT_NAME_LEN
        || name.chars().any(char::is_whitespace)
    {
        return Err(AuthError::InvalidAccountName(name.to_string()));
    }
    Ok(())
}

/// Where an account stands in this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    #[default]
    Unknown,
    LoggedIn,
    Failed,
}

#[derive(Debug, Clone)]
pub struct AccountStore {
    root: PathBuf,
}

impl AccountStore {
    pub fn new(data_dir: &Path, device_id: &str) -> Self {
        Self {
            root: data_dir.join("devices").join(device_id).join("accounts"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn key_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.key", sha256_hex(name.as_bytes())))
    }

    pub fn exists(&self, name: &str) -> bool {
        self.key_path(name).is_file()
    }

    pub fn load(&self, name: &str) -> Result<IdentityKeyPair, CryptoError> {
        IdentityKeyPair::load_from_file(&self.key_path(name))
    }

    /// Write `identity` as the account's key, replacing any previous one.
    pub fn save(&self, name: &str, identity: &IdentityKeyPair) -> Result<(), CryptoError> {
        let path = self.key_path(name);
        identity.save_to_file(&path)?;
        debug!(account = %name, path = %path.display(), "Account key saved");
        Ok(())
    }

    /// Remove the local key. Returns whether one existed.
    pub fn remove(&self, name: &str) -> Result<bool, CryptoError> {
        match std::fs::remove_file(self.key_path(name)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
