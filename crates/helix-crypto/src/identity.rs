//! Account and server identity keys.
//!
//! Every Helix account owns a long-lived X25519 keypair; the public half is
//! published to the key server's directory and is what senders encrypt to.
//! The key server carries its own keypair so clients can pin it.

use std::path::Path;

use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::error::CryptoError;

/// Length of an X25519 key in bytes.
pub const KEY_SIZE: usize = 32;

/// An X25519 identity keypair.
pub struct IdentityKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

impl IdentityKeyPair {
    /// Generate a new random identity keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Reconstruct from raw 32-byte secret key bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let mut arr = key_array(bytes)?;
        let secret = StaticSecret::from(arr);
        let public = PublicKey::from(&secret);
        arr.zeroize();
        Ok(Self { secret, public })
    }

    /// The shareable half of this keypair.
    pub fn public_identity(&self) -> PublicIdentity {
        PublicIdentity(*self.public.as_bytes())
    }

    /// Get the public key as raw bytes.
    pub fn public_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Get the secret key as raw bytes. Handle with care.
    pub fn secret_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// X25519 agreement between this secret and `remote`.
    pub fn diffie_hellman(&self, remote: &PublicIdentity) -> [u8; KEY_SIZE] {
        *self.secret.diffie_hellman(&remote.to_x25519()).as_bytes()
    }

    /// Colon-separated SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        fingerprint_of(self.public.as_bytes())
    }

    /// Save the secret key to a file with restrictive permissions.
    pub fn save_to_file(&self, path: &Path) -> Result<(), CryptoError> {
        let dir = path.parent().ok_or_else(|| {
            CryptoError::IoError(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ))
        })?;
        std::fs::create_dir_all(dir)?;

        let mut bytes = self.secret_bytes();
        std::fs::write(path, bytes)?;
        bytes.zeroize();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// Load a keypair from a file holding the 32-byte secret key.
    ///
    /// On Unix the file must be owner-only (0600).
    pub fn load_from_file(path: &Path) -> Result<Self, CryptoError> {
        use std::io::Read;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path)?.permissions().mode() & 0o777;
            if mode != 0o600 {
                return Err(CryptoError::IoError(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    format!("Identity key file has insecure permissions: {mode:o} (expected 600)"),
                )));
            }
        }

        let mut file = std::fs::File::open(path)?;
        let mut buf = [0u8; KEY_SIZE];
        file.read_exact(&mut buf)?;
        let result = Self::from_secret_bytes(&buf);
        buf.zeroize();
        result
    }

    /// Load from file, or generate a new keypair and save it.
    pub fn load_or_generate(path: &Path) -> Result<Self, CryptoError> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            let kp = Self::generate();
            kp.save_to_file(path)?;
            Ok(kp)
        }
    }
}

/// A published X25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicIdentity([u8; KEY_SIZE]);

impl std::fmt::Debug for PublicIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicIdentity({})", self.to_hex())
    }
}

impl PublicIdentity {
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        key_array(bytes).map(Self)
    }

    /// Parse the lowercase hex form used on the wire.
    pub fn from_hex(encoded: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(encoded)
            .map_err(|e| CryptoError::SerializationError(format!("invalid key hex: {e}")))?;
        Self::from_slice(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Raw SHA-256 digest of the key, as embedded in envelopes.
    pub fn fingerprint_bytes(&self) -> [u8; 32] {
        fingerprint_bytes(&self.0)
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_of(&self.0)
    }

    pub(crate) fn to_x25519(self) -> PublicKey {
        PublicKey::from(self.0)
    }
}

fn key_array(bytes: &[u8]) -> Result<[u8; KEY_SIZE], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength {
            expected: KEY_SIZE,
            actual: bytes.len(),
        })
}

/// SHA-256 digest of raw public key bytes.
pub fn fingerprint_bytes(pubkey_bytes: &[u8; KEY_SIZE]) -> [u8; 32] {
    Sha256::digest(pubkey_bytes).into()
}

/// Lowercase hex SHA-256 of `data`. Always 64 characters.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute a colon-separated hex fingerprint from raw public key bytes.
pub fn fingerprint_of(pubkey_bytes: &[u8; KEY_SIZE]) -> String {
    fingerprint_bytes(pubkey_bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn secret_bytes_reconstruct_same_public_key() {
        let kp = IdentityKeyPair::generate();
        let restored = IdentityKeyPair::from_secret_bytes(&kp.secret_bytes()).unwrap();
        assert_eq!(restored.public_bytes(), kp.public_bytes());
    }

    #[test]
    fn sha256_hex_has_fixed_length() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(sha256_hex("ü".repeat(128).as_bytes()).len(), 64);
    }

    #[test]
    fn from_secret_bytes_rejects_wrong_length() {
        assert!(matches!(
            IdentityKeyPair::from_secret_bytes(&[1u8; 31]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 31
            })
        ));
    }

    #[test]
    fn diffie_hellman_is_symmetric() {
        let a = IdentityKeyPair::generate();
        let b = IdentityKeyPair::generate();
        assert_eq!(
            a.diffie_hellman(&b.public_identity()),
            b.diffie_hellman(&a.public_identity())
        );
    }

    #[test]
    fn public_identity_hex_roundtrip() {
        let kp = IdentityKeyPair::generate();
        let public = kp.public_identity();
        let parsed = PublicIdentity::from_hex(&public.to_hex()).unwrap();
        assert_eq!(parsed, public);
        assert!(PublicIdentity::from_hex("zz").is_err());
        assert!(PublicIdentity::from_hex("abcd").is_err());
    }

    #[test]
    fn fingerprint_format() {
        let kp = IdentityKeyPair::generate();
        let fp = kp.fingerprint();
        assert_eq!(fp.split(':').count(), 32);
        assert_eq!(fp, kp.public_identity().fingerprint());
        assert_eq!(fp, fingerprint_of(&kp.public_bytes()));
    }

    #[test]
    fn save_and_load_preserves_keypair() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("accounts").join("alice.key");
        let kp = IdentityKeyPair::generate();
        kp.save_to_file(&path).unwrap();

        let loaded = IdentityKeyPair::load_from_file(&path).unwrap();
        assert_eq!(loaded.public_bytes(), kp.public_bytes());
    }

    #[cfg(unix)]
    #[test]
    fn load_rejects_world_readable_key() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loose.key");
        IdentityKeyPair::generate().save_to_file(&path).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let err = IdentityKeyPair::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("insecure permissions"));
    }

    #[test]
    fn load_or_generate_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.key");
        let first = IdentityKeyPair::load_or_generate(&path).unwrap();
        let second = IdentityKeyPair::load_or_generate(&path).unwrap();
        assert_eq!(first.public_bytes(), second.public_bytes());
    }

    #[test]
    fn load_truncated_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, [0u8; 10]).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        assert!(IdentityKeyPair::load_from_file(&path).is_err());
    }
}
