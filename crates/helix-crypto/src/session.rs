//! Symmetric AEAD session.
//!
//! A [`CryptoSession`] holds a ChaCha20-Poly1305 key derived through
//! HKDF-SHA256 from arbitrary input key material: an X25519 shared secret for
//! the key-server channel, or a shared secret followed by a password-derived
//! key for sealed envelopes.

use std::sync::atomic::{AtomicU32, Ordering};

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// HKDF salt for domain separation (recommended by RFC 5869).
const HKDF_SALT: &[u8] = b"helix-hkdf-salt-v1";

/// Nonce size for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 authentication tag appended to every ciphertext.
pub const TAG_SIZE: usize = 16;

/// Ciphertext together with the nonce it was produced under.
#[derive(Debug, Clone)]
pub struct EncryptedData {
    /// ChaCha20-Poly1305 ciphertext (includes 16-byte auth tag).
    pub ciphertext: Vec<u8>,
    /// 12-byte nonce used for this encryption.
    pub nonce: [u8; NONCE_SIZE],
}

/// A symmetric session bound to one derived key.
pub struct CryptoSession {
    cipher: ChaCha20Poly1305,
    /// Random prefix for nonces (set once per session).
    nonce_prefix: [u8; 8],
    /// Monotonic counter for nonce uniqueness.
    nonce_counter: AtomicU32,
}

impl std::fmt::Debug for CryptoSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoSession")
            .field("nonce_counter", &self.nonce_counter.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// Expand input key material into a 32-byte key bound to `info`.
///
/// The caller is responsible for zeroizing the returned bytes.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; 32], CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), ikm);
    let mut key = [0u8; 32];
    hk.expand(info, &mut key)
        .map_err(|e| CryptoError::KeyDerivationFailed(e.to_string()))?;
    Ok(key)
}

impl Drop for CryptoSession {
    fn drop(&mut self) {
        self.nonce_prefix.zeroize();
    }
}

impl CryptoSession {
    /// Derive a session from input key material and a context label.
    ///
    /// Two sessions derived from the same `ikm` and `info` can open each
    /// other's ciphertexts; a different `info` yields an unrelated key.
    pub fn derive(ikm: &[u8], info: &[u8]) -> Result<Self, CryptoError> {
        let mut key_bytes = hkdf_derive(ikm, info)?;
        let cipher = ChaCha20Poly1305::new(Key::from_slice(&key_bytes));
        key_bytes.zeroize();

        let mut nonce_prefix = [0u8; 8];
        OsRng.fill_bytes(&mut nonce_prefix);

        Ok(Self {
            cipher,
            nonce_prefix,
            nonce_counter: AtomicU32::new(0),
        })
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<EncryptedData, CryptoError> {
        let nonce_bytes = self.next_nonce()?;
        let ciphertext = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

        Ok(EncryptedData {
            ciphertext,
            nonce: nonce_bytes,
        })
    }

    /// Decrypt ciphertext produced under `nonce_bytes` with the same `aad`.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce_bytes: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(CryptoError::InvalidNonceLength {
                expected: NONCE_SIZE,
                actual: nonce_bytes.len(),
            });
        }
        self.cipher
            .decrypt(
                Nonce::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))
    }

    /// Encrypt into a self-describing frame: `nonce || ciphertext`.
    pub fn seal_frame(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let encrypted = self.encrypt(plaintext, &[])?;
        let mut frame = Vec::with_capacity(NONCE_SIZE + encrypted.ciphertext.len());
        frame.extend_from_slice(&encrypted.nonce);
        frame.extend_from_slice(&encrypted.ciphertext);
        Ok(frame)
    }

    /// Open a frame produced by [`seal_frame`](Self::seal_frame).
    pub fn open_frame(&self, frame: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if frame.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed(format!(
                "frame too short: {} bytes",
                frame.len()
            )));
        }
        let (nonce, ciphertext) = frame.split_at(NONCE_SIZE);
        self.decrypt(ciphertext, nonce, &[])
    }

    /// Generate the next unique nonce.
    ///
    /// Layout: [4-byte counter (big-endian)] [8-byte random prefix]
    ///
    /// Returns `NonceExhausted` once the counter reaches `u32::MAX`.
    fn next_nonce(&self) -> Result<[u8; NONCE_SIZE], CryptoError> {
        loop {
            let current = self.nonce_counter.load(Ordering::Relaxed);
            if current == u32::MAX {
                return Err(CryptoError::NonceExhausted);
            }
            if let Ok(prev) = self.nonce_counter.compare_exchange_weak(
                current,
                current + 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                let mut nonce = [0u8; NONCE_SIZE];
                nonce[..4].copy_from_slice(&prev.to_be_bytes());
                nonce[4..].copy_from_slice(&self.nonce_prefix);
                return Ok(nonce);
            }
        }
    }

    /// Get the current nonce counter value (for testing).
    #[cfg(any(test, feature = "test-utils"))]
    pub fn nonce_counter(&self) -> u32 {
        self.nonce_counter.load(Ordering::Relaxed)
    }
}

/// Create two sessions sharing one random key.
#[cfg(any(test, feature = "test-utils"))]
pub fn test_session_pair() -> Result<(CryptoSession, CryptoSession), CryptoError> {
    let mut ikm = [0u8; 32];
    OsRng.fill_bytes(&mut ikm);
    let a = CryptoSession::derive(&ikm, b"helix-test")?;
    let b = CryptoSession::derive(&ikm, b"helix-test")?;
    ikm.zeroize();
    Ok((a, b))
}
