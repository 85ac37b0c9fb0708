//! Key-server channel key agreement.
//!
//! The client brings a fresh ephemeral key. The server answers with its own
//! ephemeral key and its long-lived identity key. Both sides feed two X25519
//! agreements into HKDF:
//!
//! ```text
//! ikm = DH(e_client, e_server) || DH(e_client, S_server)
//! ```
//!
//! Only the holder of the server identity secret derives the same channel
//! key, which is what lets clients pin a key server by fingerprint.

use std::sync::Arc;

use rand::rngs::OsRng;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::identity::{IdentityKeyPair, KEY_SIZE, PublicIdentity, fingerprint_of};
use crate::session::CryptoSession;

/// HKDF info label for channel keys.
const CHANNEL_INFO: &[u8] = b"helix-channel-v1";

/// State of a key exchange in progress.
pub struct KeyExchangeState {
    ephemeral_secret: StaticSecret,
    ephemeral_public: PublicKey,
    /// Server identity; absent on the client side.
    identity: Option<Arc<IdentityKeyPair>>,
}

impl Default for KeyExchangeState {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyExchangeState {
    /// Client side: generate an ephemeral keypair.
    pub fn new() -> Self {
        let ephemeral_secret = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral_secret);
        Self {
            ephemeral_secret,
            ephemeral_public,
            identity: None,
        }
    }

    /// Server side: ephemeral keypair plus the server's identity.
    pub fn with_identity(identity: Arc<IdentityKeyPair>) -> Self {
        Self {
            identity: Some(identity),
            ..Self::new()
        }
    }

    /// Our ephemeral public key bytes to send to the peer.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        *self.ephemeral_public.as_bytes()
    }

    /// Fingerprint of the server identity (if set).
    pub fn identity_fingerprint(&self) -> Option<String> {
        self.identity.as_ref().map(|id| id.fingerprint())
    }

    /// Finish on the client with the server's ephemeral and identity keys.
    pub fn complete_client(
        self,
        server_ephemeral: &[u8],
        server_identity: &PublicIdentity,
    ) -> Result<CryptoSession, CryptoError> {
        let server_ephemeral = PublicIdentity::from_slice(server_ephemeral)?;
        let mut ikm = [0u8; 2 * KEY_SIZE];
        ikm[..KEY_SIZE].copy_from_slice(
            self.ephemeral_secret
                .diffie_hellman(&server_ephemeral.to_x25519())
                .as_bytes(),
        );
        ikm[KEY_SIZE..].copy_from_slice(
            self.ephemeral_secret
                .diffie_hellman(&server_identity.to_x25519())
                .as_bytes(),
        );
        let session = CryptoSession::derive(&ikm, CHANNEL_INFO);
        ikm.zeroize();
        session
    }

    /// Finish on the server with the client's ephemeral key.
    pub fn complete_server(self, client_ephemeral: &[u8]) -> Result<CryptoSession, CryptoError> {
        let identity = self.identity.as_ref().ok_or_else(|| {
            CryptoError::KeyDerivationFailed("server identity not configured".into())
        })?;
        let client_ephemeral = PublicIdentity::from_slice(client_ephemeral)?;
        let mut ikm = [0u8; 2 * KEY_SIZE];
        ikm[..KEY_SIZE].copy_from_slice(
            self.ephemeral_secret
                .diffie_hellman(&client_ephemeral.to_x25519())
                .as_bytes(),
        );
        ikm[KEY_SIZE..].copy_from_slice(&identity.diffie_hellman(&client_ephemeral));
        let session = CryptoSession::derive(&ikm, CHANNEL_INFO);
        ikm.zeroize();
        session
    }
}

/// Constant-time byte comparison.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Verify that a public key matches an expected fingerprint.
pub fn verify_fingerprint(pubkey_bytes: &[u8; KEY_SIZE], expected_fingerprint: &str) -> bool {
    constant_time_eq(
        fingerprint_of(pubkey_bytes).as_bytes(),
        expected_fingerprint.as_bytes(),
    )
}

/// Run both halves of the exchange in-process.
#[cfg(any(test, feature = "test-utils"))]
pub fn perform_key_exchange(
    server_identity: Arc<IdentityKeyPair>,
) -> Result<(CryptoSession, CryptoSession), CryptoError> {
    let client = KeyExchangeState::new();
    let server_public = server_identity.public_identity();
    let server = KeyExchangeState::with_identity(server_identity);

    let client_pub = client.public_bytes();
    let server_pub = server.public_bytes();

    let client_session = client.complete_client(&server_pub, &server_public)?;
    let server_session = server.complete_server(&client_pub)?;
    Ok((client_session, server_session))
}
