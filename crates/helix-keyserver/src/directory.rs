//! In-memory account directory.
//!
//! Names are unique. An existing name may only be registered again from the
//! device that first registered it, which lets a client that lost its local
//! key re-provision itself without letting anyone else take the name over.

use std::collections::HashMap;

use helix_crypto::{PublicIdentity, constant_time_eq};
use helix_proto::{DirectoryEntry, ErrorCode};
use tracing::{debug, info};

const MAX_NAME_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    #[error("Invalid account name {0:?}")]
    InvalidName(String),

    #[error("Account {0} is registered from another device")]
    NameTaken(String),

    #[error("Email {0} belongs to another account")]
    EmailTaken(String),

    #[error("No account named {0}")]
    UnknownAccount(String),

    #[error("Key does not match the one registered for {0}")]
    KeyMismatch(String),
}

impl DirectoryError {
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidName(_) | Self::EmailTaken(_) => ErrorCode::InvalidRequest,
            Self::NameTaken(_) => ErrorCode::NameTaken,
            Self::UnknownAccount(_) => ErrorCode::UnknownAccount,
            Self::KeyMismatch(_) => ErrorCode::KeyMismatch,
        }
    }
}

/// A registered account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub name: String,
    pub email: Option<String>,
    pub public_key: PublicIdentity,
    /// Device that registered the account.
    pub device_id: String,
}

impl Account {
    pub fn to_entry(&self) -> DirectoryEntry {
        DirectoryEntry {
            name: self.name.clone(),
            email: self.email.clone(),
            public_key: self.public_key.to_hex(),
            fingerprint: self.public_key.fingerprint(),
        }
    }
}

#[derive(Debug, Default)]
pub struct Directory {
    accounts: HashMap<String, Account>,
    /// Lowercased email to account name.
    by_email: HashMap<String, String>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name`, replacing a previous registration from the same
    /// device.
    pub fn create(
        &mut self,
        name: &str,
        email: Option<&str>,
        public_key: PublicIdentity,
        device_id: &str,
    ) -> Result<(), DirectoryError> {
        if name.is_empty()
            || name.chars().count() > MAX_NAME_LEN
            || name.chars().any(char::is_whitespace)
        {
            return Err(DirectoryError::InvalidName(name.to_string()));
        }
        if let Some(existing) = self.accounts.get(name)
            && existing.device_id != device_id
        {
            return Err(DirectoryError::NameTaken(name.to_string()));
        }
        let email_key = email.map(str::to_lowercase);
        if let Some(key) = &email_key
            && let Some(owner) = self.by_email.get(key)
            && owner != name
        {
            return Err(DirectoryError::EmailTaken(key.clone()));
        }

        let replaced = self.remove(name).is_some();
        if let Some(key) = email_key {
            self.by_email.insert(key, name.to_string());
        }
        self.accounts.insert(
            name.to_string(),
            Account {
                name: name.to_string(),
                email: email.map(str::to_string),
                public_key,
                device_id: device_id.to_string(),
            },
        );
        info!(account = %name, %device_id, replaced, "Account registered");
        Ok(())
    }

    /// Check that `public_key` is the key registered for `name`.
    pub fn login(&self, name: &str, public_key: &PublicIdentity) -> Result<&Account, DirectoryError> {
        let account = self
            .accounts
            .get(name)
            .ok_or_else(|| DirectoryError::UnknownAccount(name.to_string()))?;
        if !constant_time_eq(account.public_key.as_bytes(), public_key.as_bytes()) {
            debug!(account = %name, "Login with wrong key");
            return Err(DirectoryError::KeyMismatch(name.to_string()));
        }
        Ok(account)
    }

    /// Remove `name`; the caller must prove possession of its key.
    pub fn delete(
        &mut self,
        name: &str,
        public_key: &PublicIdentity,
    ) -> Result<Account, DirectoryError> {
        self.login(name, public_key)?;
        let account = self
            .remove(name)
            .ok_or_else(|| DirectoryError::UnknownAccount(name.to_string()))?;
        info!(account = %name, "Account deleted");
        Ok(account)
    }

    fn remove(&mut self, name: &str) -> Option<Account> {
        let account = self.accounts.remove(name)?;
        if let Some(email) = &account.email {
            self.by_email.remove(&email.to_lowercase());
        }
        Some(account)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Account> {
        self.accounts.get(name)
    }

    /// Case-insensitive email lookup.
    pub fn find_by_email(&self, email: &str) -> Option<&Account> {
        self.by_email
            .get(&email.to_lowercase())
            .and_then(|name| self.accounts.get(name))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use helix_crypto::IdentityKeyPair;

    use super::*;

    fn key() -> PublicIdentity {
        IdentityKeyPair::generate().public_identity()
    }

    #[test]
    fn create_then_login() {
        let mut dir = Directory::new();
        let k = key();
        dir.create("alice", Some("Alice@Example.com"), k, "dev-a").unwrap();

        assert_eq!(dir.login("alice", &k).unwrap().name, "alice");
        assert_eq!(
            dir.login("alice", &key()),
            Err(DirectoryError::KeyMismatch("alice".into()))
        );
        assert_eq!(
            dir.login("bob", &k),
            Err(DirectoryError::UnknownAccount("bob".into()))
        );
    }

    #[test]
    fn same_device_may_reregister() {
        let mut dir = Directory::new();
        dir.create("alice", None, key(), "dev-a").unwrap();
        let fresh = key();
        dir.create("alice", None, fresh, "dev-a").unwrap();
        assert_eq!(dir.find_by_name("alice").unwrap().public_key, fresh);
        assert_eq!(dir.len(), 1);
    }

    #[test]
    fn other_device_cannot_take_a_name() {
        let mut dir = Directory::new();
        let original = key();
        dir.create("alice", None, original, "dev-a").unwrap();
        let err = dir.create("alice", None, key(), "dev-b").unwrap_err();
        assert_eq!(err, DirectoryError::NameTaken("alice".into()));
        assert_eq!(err.code(), ErrorCode::NameTaken);
        assert_eq!(dir.find_by_name("alice").unwrap().public_key, original);
    }

    #[test]
    fn email_lookup_ignores_case() {
        let mut dir = Directory::new();
        dir.create("alice", Some("Alice@Example.com"), key(), "d")
            .unwrap();
        assert_eq!(
            dir.find_by_email("alice@example.COM").unwrap().name,
            "alice"
        );
        assert!(dir.find_by_email("bob@example.com").is_none());
    }

    #[test]
    fn email_is_unique_across_accounts() {
        let mut dir = Directory::new();
        dir.create("alice", Some("shared@example.com"), key(), "d")
            .unwrap();
        assert!(matches!(
            dir.create("bob", Some("SHARED@example.com"), key(), "d"),
            Err(DirectoryError::EmailTaken(_))
        ));
    }

    #[test]
    fn delete_requires_key_and_clears_email() {
        let mut dir = Directory::new();
        let k = key();
        dir.create("alice", Some("a@example.com"), k, "d").unwrap();

        assert!(matches!(
            dir.delete("alice", &key()),
            Err(DirectoryError::KeyMismatch(_))
        ));
        dir.delete("alice", &k).unwrap();
        assert!(dir.is_empty());
        assert!(dir.find_by_email("a@example.com").is_none());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let mut dir = Directory::new();
        for bad in ["", "two words", &"x".repeat(129)] {
            assert!(matches!(
                dir.create(bad, None, key(), "d"),
                Err(DirectoryError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn entry_carries_matching_fingerprint() {
        let mut dir = Directory::new();
        let k = key();
        dir.create("alice", None, k, "d").unwrap();
        let entry = dir.find_by_name("alice").unwrap().to_entry();
        assert_eq!(entry.public_key, k.to_hex());
        assert_eq!(entry.fingerprint, k.fingerprint());
    }
}
