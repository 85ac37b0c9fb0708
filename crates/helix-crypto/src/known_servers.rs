//! Trust-on-first-use store of key-server identities.
//!
//! The first successful handshake with a key server records its identity
//! fingerprint under the server's address. Later handshakes must present the
//! same identity; a different one is reported as a mismatch and the client
//! refuses the channel.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::exchange::constant_time_eq;

/// A pinned key server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownServer {
    /// `host:port` the server was reached at.
    pub address: String,
    /// Identifier the server announced in its welcome.
    pub server_id: String,
    /// Colon-separated fingerprint of the server identity key.
    pub fingerprint: String,
    /// Unix timestamp of the first handshake.
    pub first_seen: i64,
    /// Unix timestamp of the latest matching handshake.
    pub last_seen: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KnownServers {
    pub servers: HashMap<String, KnownServer>,
}

/// Outcome of checking a presented identity against the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinCheck {
    /// Never seen this address before.
    TrustOnFirstUse,
    Matched,
    Mismatch { expected: String, actual: String },
}

impl KnownServers {
    /// Load from a JSON file. A missing file is an empty store.
    pub fn load(path: &Path) -> Result<Self, CryptoError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data).map_err(|e| {
            CryptoError::SerializationError(format!("Failed to parse known servers: {e}"))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), CryptoError> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            CryptoError::SerializationError(format!("Failed to serialize known servers: {e}"))
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Compare `fingerprint` with the one pinned for `address`.
    pub fn check(&self, address: &str, fingerprint: &str) -> PinCheck {
        match self.servers.get(address) {
            None => PinCheck::TrustOnFirstUse,
            Some(known) if constant_time_eq(known.fingerprint.as_bytes(), fingerprint.as_bytes()) => {
                PinCheck::Matched
            }
            Some(known) => PinCheck::Mismatch {
                expected: known.fingerprint.clone(),
                actual: fingerprint.to_string(),
            },
        }
    }

    /// Pin on first use, otherwise refresh `last_seen`.
    ///
    /// Never replaces an existing fingerprint; use [`forget`](Self::forget)
    /// first when a server legitimately rotates its key.
    pub fn record(&mut self, address: &str, server_id: &str, fingerprint: &str, now: i64) {
        let entry = self
            .servers
            .entry(address.to_string())
            .or_insert_with(|| KnownServer {
                address: address.to_string(),
                server_id: server_id.to_string(),
                fingerprint: fingerprint.to_string(),
                first_seen: now,
                last_seen: now,
            });
        entry.last_seen = now;
    }

    pub fn forget(&mut self, address: &str) -> bool {
        self.servers.remove(address).is_some()
    }
}
