//! Sealed envelopes: ciphertext addressed to one published identity.
//!
//! Layout:
//!
//! ```text
//! magic "HLX1" (4) | flags (1) | recipient fingerprint (32) | ephemeral key (32)
//! | [salt (16) when flags & PASSWORD] | nonce (12) | ciphertext + tag
//! ```
//!
//! Everything before the nonce is authenticated as associated data. The
//! content key is `HKDF(DH(ephemeral, recipient) || argon2id(password, salt)?)`.

use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::exchange::constant_time_eq;
use crate::identity::{IdentityKeyPair, KEY_SIZE, PublicIdentity};
use crate::password::{SALT_SIZE, derive_password_key, generate_salt};
use crate::session::{CryptoSession, NONCE_SIZE, TAG_SIZE};

pub const MAGIC: &[u8; 4] = b"HLX1";

const FLAG_PASSWORD: u8 = 0x01;

/// HKDF info label for envelope content keys.
const ENVELOPE_INFO: &[u8] = b"helix-envelope-v1";

const FINGERPRINT_SIZE: usize = 32;

/// Bytes preceding the optional salt.
const BASE_HEADER_SIZE: usize = MAGIC.len() + 1 + FINGERPRINT_SIZE + KEY_SIZE;

/// Smallest possible envelope (no password, one byte of plaintext).
pub const MIN_ENVELOPE_SIZE: usize = BASE_HEADER_SIZE + NONCE_SIZE + TAG_SIZE + 1;

/// Parsed envelope header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub recipient_fingerprint: [u8; FINGERPRINT_SIZE],
    pub ephemeral: PublicIdentity,
    pub salt: Option<[u8; SALT_SIZE]>,
}

impl EnvelopeHeader {
    pub const fn is_password_protected(&self) -> bool {
        self.salt.is_some()
    }
}

/// Header plus borrowed slices into the blob.
struct Parsed<'a> {
    header: EnvelopeHeader,
    aad: &'a [u8],
    nonce: &'a [u8],
    ciphertext: &'a [u8],
}

/// Seal `plaintext` so that only `recipient` can open it.
pub fn seal(
    recipient: &PublicIdentity,
    plaintext: &[u8],
    password: Option<&str>,
) -> Result<Vec<u8>, CryptoError> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyPlaintext);
    }

    let ephemeral = IdentityKeyPair::generate();
    let salt = password.map(|_| generate_salt());

    let mut blob = Vec::with_capacity(
        BASE_HEADER_SIZE + SALT_SIZE + NONCE_SIZE + plaintext.len() + TAG_SIZE,
    );
    blob.extend_from_slice(MAGIC);
    blob.push(if salt.is_some() { FLAG_PASSWORD } else { 0 });
    blob.extend_from_slice(&recipient.fingerprint_bytes());
    blob.extend_from_slice(&ephemeral.public_bytes());
    if let Some(salt) = &salt {
        blob.extend_from_slice(salt);
    }

    let shared = ephemeral.diffie_hellman(recipient);
    let session = content_session(
        &shared,
        password,
        salt.as_ref().map(<[u8; SALT_SIZE]>::as_slice),
    )?;
    let sealed = session.encrypt(plaintext, &blob)?;

    blob.extend_from_slice(&sealed.nonce);
    blob.extend_from_slice(&sealed.ciphertext);
    Ok(blob)
}

/// Open an envelope addressed to `identity`.
pub fn open(
    identity: &IdentityKeyPair,
    blob: &[u8],
    password: Option<&str>,
) -> Result<Vec<u8>, CryptoError> {
    let parsed = parse(blob)?;

    let ours = identity.public_identity().fingerprint_bytes();
    if !constant_time_eq(&ours, &parsed.header.recipient_fingerprint) {
        return Err(CryptoError::WrongRecipient);
    }
    let password = match (&parsed.header.salt, password) {
        (Some(_), None) => return Err(CryptoError::PasswordRequired),
        (Some(_), pw) => pw,
        (None, _) => None,
    };

    let shared = identity.diffie_hellman(&parsed.header.ephemeral);
    let session = content_session(
        &shared,
        password,
        parsed.header.salt.as_ref().map(<[u8; SALT_SIZE]>::as_slice),
    )?;
    session.decrypt(parsed.ciphertext, parsed.nonce, parsed.aad)
}

/// Read the header without decrypting.
pub fn inspect(blob: &[u8]) -> Result<EnvelopeHeader, CryptoError> {
    parse(blob).map(|p| p.header)
}

fn content_session(
    shared: &[u8; KEY_SIZE],
    password: Option<&str>,
    salt: Option<&[u8]>,
) -> Result<CryptoSession, CryptoError> {
    let mut ikm = Vec::with_capacity(2 * KEY_SIZE);
    ikm.extend_from_slice(shared);
    if let (Some(password), Some(salt)) = (password, salt) {
        let mut stretched = derive_password_key(password, salt)?;
        ikm.extend_from_slice(&stretched);
        stretched.zeroize();
    }
    let session = CryptoSession::derive(&ikm, ENVELOPE_INFO);
    ikm.zeroize();
    session
}

fn parse(blob: &[u8]) -> Result<Parsed<'_>, CryptoError> {
    if blob.len() < BASE_HEADER_SIZE {
        return Err(CryptoError::MalformedEnvelope(format!(
            "{} bytes is shorter than the envelope header",
            blob.len()
        )));
    }
    if &blob[..MAGIC.len()] != MAGIC {
        return Err(CryptoError::MalformedEnvelope("bad magic".into()));
    }

    let flags = blob[MAGIC.len()];
    if flags & !FLAG_PASSWORD != 0 {
        return Err(CryptoError::MalformedEnvelope(format!(
            "unknown flags {flags:#04x}"
        )));
    }

    let mut offset = MAGIC.len() + 1;
    let mut recipient_fingerprint = [0u8; FINGERPRINT_SIZE];
    recipient_fingerprint.copy_from_slice(&blob[offset..offset + FINGERPRINT_SIZE]);
    offset += FINGERPRINT_SIZE;
    let ephemeral = PublicIdentity::from_slice(&blob[offset..offset + KEY_SIZE])?;
    offset += KEY_SIZE;

    let salt = if flags & FLAG_PASSWORD == 0 {
        None
    } else {
        let bytes = blob
            .get(offset..offset + SALT_SIZE)
            .ok_or_else(|| CryptoError::MalformedEnvelope("truncated salt".into()))?;
        offset += SALT_SIZE;
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(bytes);
        Some(salt)
    };

    if blob.len() < offset + NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::MalformedEnvelope("truncated ciphertext".into()));
    }
    let (aad, rest) = blob.split_at(offset);
    let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

    Ok(Parsed {
        header: EnvelopeHeader {
            recipient_fingerprint,
            ephemeral,
            salt,
        },
        aad,
        nonce,
        ciphertext,
    })
}
