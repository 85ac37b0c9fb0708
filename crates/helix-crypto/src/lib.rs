//! Helix cryptographic primitives.
//!
//! Everything that touches key material lives here so the client engine,
//! the key server, and the CLI share one audited set of constructions.
//!
//! ## Crypto primitives
//!
//! - **Identity**: X25519 static keypair per account (and per key server)
//! - **Envelope**: ephemeral X25519 to the recipient's identity → HKDF-SHA256
//!   (optionally mixed with an Argon2id password key) → ChaCha20-Poly1305
//! - **Channel**: ephemeral + server-static X25519 → HKDF-SHA256 → ChaCha20-Poly1305
//!   with 12-byte nonces (4-byte counter + 8-byte random prefix)

pub mod envelope;
pub mod error;
pub mod exchange;
pub mod identity;
pub mod known_servers;
pub mod password;
pub mod session;

pub use envelope::{EnvelopeHeader, MIN_ENVELOPE_SIZE};
pub use error::CryptoError;
#[cfg(any(test, feature = "test-utils"))]
pub use exchange::perform_key_exchange;
pub use exchange::{KeyExchangeState, constant_time_eq, verify_fingerprint};
pub use identity::{IdentityKeyPair, KEY_SIZE, PublicIdentity, fingerprint_of, sha256_hex};
pub use known_servers::{KnownServer, KnownServers, PinCheck};
#[cfg(any(test, feature = "test-utils"))]
pub use session::test_session_pair;
pub use session::{CryptoSession, EncryptedData, NONCE_SIZE, TAG_SIZE};
