//! Crypto engine.
//!
//! Encrypt and decrypt run as runtime tasks; the cipher work itself goes to
//! the blocking pool. Each operation reports through its promise, and its
//! output stays in the registry until it is taken or concluded.

use std::sync::Arc;

use helix_crypto::{CryptoError, EnvelopeHeader, IdentityKeyPair, envelope};
use tokio::runtime::Handle;
use tokio::task::JoinError;
use tracing::{debug, error, warn};
use zeroize::Zeroizing;

use crate::buffer::{EngineBuffer, InputBuffer, OutputBuffer, Ownership};
use crate::directory::ResolvedIdentity;
use crate::error::{CryptoOperationError, Error, OwnershipViolation};
use crate::promise::{Failure, HeldOutput, Outcome, PromiseId, PromiseKind, PromiseRegistry};

#[derive(Debug, Clone)]
pub(crate) struct CryptoEngine {
    registry: Arc<PromiseRegistry>,
    runtime: Handle,
}

impl CryptoEngine {
    pub(crate) const fn new(registry: Arc<PromiseRegistry>, runtime: Handle) -> Self {
        Self { registry, runtime }
    }

    /// Seal `plaintext` for `recipient`. The plaintext is copied before this
    /// returns.
    pub(crate) fn encrypt(
        &self,
        recipient: &ResolvedIdentity,
        plaintext: &[u8],
        password: Option<&str>,
        ownership: Ownership,
    ) -> PromiseId {
        let id = self.registry.issue(PromiseKind::Encrypt);

        if !self.is_live(recipient) {
            self.fail(
                id,
                CryptoOperationError::Failed(format!(
                    "recipient identity from search {} is no longer valid",
                    recipient.promise()
                )),
            );
            return id;
        }
        if plaintext.is_empty() {
            self.fail(
                id,
                CryptoOperationError::Failed(CryptoError::EmptyPlaintext.to_string()),
            );
            return id;
        }

        let key = *recipient.public_key();
        let plaintext = InputBuffer::EngineCopy(plaintext).into_shared();
        let password = password.map(|p| Zeroizing::new(p.to_string()));
        debug!(
            promise = %id,
            recipient = %recipient.account(),
            bytes = plaintext.len(),
            "Encrypt issued"
        );

        self.run(id, ownership, move || {
            envelope::seal(&key, &plaintext, password.as_deref().map(String::as_str))
        });
        id
    }

    /// Open `blob` with `identity`. Caller-owned input is read in place.
    pub(crate) fn decrypt(
        &self,
        identity: Arc<IdentityKeyPair>,
        blob: InputBuffer<'_>,
        password: Option<&str>,
        ownership: Ownership,
    ) -> PromiseId {
        let id = self.registry.issue(PromiseKind::Decrypt);
        let blob = blob.into_shared();
        let password = password.map(|p| Zeroizing::new(p.to_string()));
        debug!(promise = %id, bytes = blob.len(), "Decrypt issued");

        self.run(id, ownership, move || {
            envelope::open(&identity, &blob, password.as_deref().map(String::as_str))
        });
        id
    }

    fn run<F>(&self, id: PromiseId, ownership: Ownership, job: F)
    where
        F: FnOnce() -> Result<Vec<u8>, CryptoError> + Send + 'static,
    {
        let registry = Arc::clone(&self.registry);
        self.runtime.spawn(async move {
            registry.mark_waiting(id);
            let result = tokio::task::spawn_blocking(job).await;
            registry.complete(id, into_outcome(id, result, ownership));
        });
    }

    fn fail(&self, id: PromiseId, err: CryptoOperationError) {
        self.registry
            .complete(id, Outcome::Failed(Failure::Crypto(err)));
    }

    /// The search that produced `recipient` is still outstanding and resolved
    /// to this exact identity.
    pub(crate) fn is_live(&self, recipient: &ResolvedIdentity) -> bool {
        self.registry
            .with_outcome(recipient.promise(), |kind, status, outcome| {
                kind == PromiseKind::Search
                    && status.has_data()
                    && matches!(outcome, Outcome::Resolved(r) if *r == *recipient)
            })
            .unwrap_or(false)
    }

    /// Retrieve the output of a finished encrypt or decrypt.
    pub(crate) fn output(&self, id: PromiseId) -> Result<OutputBuffer, Error> {
        let taken = self
            .registry
            .with_outcome(id, |kind, status, outcome| -> Result<OutputBuffer, Error> {
                if kind == PromiseKind::Search {
                    return Err(wrong_kind(id, CRYPTO_KINDS, kind).into());
                }
                if !status.has_data() {
                    let reason = match outcome {
                        Outcome::Failed(failure) => Some(failure.to_string()),
                        _ => None,
                    };
                    return Err(CryptoOperationError::InvalidStatus { status, reason }.into());
                }
                match outcome {
                    Outcome::Output(HeldOutput::Caller(slot)) => {
                        if slot.as_ref().is_some_and(Vec::is_empty) {
                            return Err(CryptoOperationError::EmptyResult.into());
                        }
                        slot.take()
                            .map(OutputBuffer::Caller)
                            .ok_or_else(|| OwnershipViolation::OutputAlreadyTaken(id).into())
                    }
                    Outcome::Output(HeldOutput::Engine(bytes)) => {
                        if bytes.is_empty() {
                            Err(CryptoOperationError::EmptyResult.into())
                        } else {
                            Ok(OutputBuffer::Engine(EngineBuffer::new(id, Arc::clone(bytes))))
                        }
                    }
                    _ => Err(CryptoOperationError::InvalidStatus {
                        status,
                        reason: None,
                    }
                    .into()),
                }
            })
            .map_err(Error::from)
            .and_then(|r| r);

        if let Err(Error::Ownership(violation)) = &taken {
            error!(promise = %id, %violation, "Ownership violation on output");
        }
        taken
    }

    /// Whether `output` would currently hand back data.
    pub(crate) fn output_exists(&self, id: PromiseId) -> Result<bool, Error> {
        Ok(self.registry.with_outcome(id, |_, status, outcome| {
            status.has_data()
                && match outcome {
                    Outcome::Output(HeldOutput::Caller(slot)) => slot.is_some(),
                    Outcome::Output(HeldOutput::Engine(_)) => true,
                    _ => false,
                }
        })?)
    }

    /// Whether a decrypt finished with authenticated plaintext. Stays true
    /// after the output has been taken.
    pub(crate) fn decrypt_is_valid(&self, id: PromiseId) -> Result<bool, Error> {
        let valid = self.registry.with_outcome(id, |kind, status, _| {
            if kind == PromiseKind::Decrypt {
                Ok(status.has_data())
            } else {
                Err(wrong_kind(id, "decrypt", kind))
            }
        })?;
        if let Err(violation) = &valid {
            error!(promise = %id, %violation, "Ownership violation on decrypt check");
        }
        Ok(valid?)
    }

    /// Header of the envelope a finished encrypt produced, read without
    /// taking the output.
    pub(crate) fn envelope_header(&self, id: PromiseId) -> Result<EnvelopeHeader, Error> {
        self.registry
            .with_outcome(id, |kind, status, outcome| -> Result<EnvelopeHeader, Error> {
                if kind != PromiseKind::Encrypt {
                    let violation = wrong_kind(id, "encrypt", kind);
                    error!(promise = %id, %violation, "Ownership violation on envelope header");
                    return Err(violation.into());
                }
                let blob: &[u8] = match outcome {
                    Outcome::Output(HeldOutput::Engine(bytes)) => &bytes[..],
                    Outcome::Output(HeldOutput::Caller(Some(bytes))) => &bytes[..],
                    Outcome::Output(HeldOutput::Caller(None)) => {
                        return Err(OwnershipViolation::OutputAlreadyTaken(id).into());
                    }
                    Outcome::Failed(failure) => {
                        return Err(CryptoOperationError::InvalidStatus {
                            status,
                            reason: Some(failure.to_string()),
                        }
                        .into());
                    }
                    Outcome::Pending | Outcome::Resolved(_) => {
                        return Err(CryptoOperationError::InvalidStatus {
                            status,
                            reason: None,
                        }
                        .into());
                    }
                };
                envelope::inspect(blob)
                    .map_err(|e| CryptoOperationError::Failed(e.to_string()).into())
            })?
    }

    /// Release a crypto promise and whatever output the engine still holds.
    pub(crate) fn conclude(&self, id: PromiseId) -> Result<(), Error> {
        let outcome = self.registry.remove(id, |kind| {
            if kind == PromiseKind::Search {
                let violation = wrong_kind(id, CRYPTO_KINDS, kind);
                error!(promise = %id, %violation, "Ownership violation on conclude");
                Err(violation)
            } else {
                Ok(())
            }
        })?;
        if let Outcome::Output(HeldOutput::Engine(bytes)) = &outcome {
            debug!(promise = %id, bytes = bytes.len(), "Engine output released");
        }
        Ok(())
    }
}

const CRYPTO_KINDS: &str = "encrypt or decrypt";

const fn wrong_kind(
    id: PromiseId,
    expected: &'static str,
    actual: PromiseKind,
) -> OwnershipViolation {
    OwnershipViolation::WrongKind {
        id,
        expected,
        actual,
    }
}

fn into_outcome(
    id: PromiseId,
    result: Result<Result<Vec<u8>, CryptoError>, JoinError>,
    ownership: Ownership,
) -> Outcome {
    match result {
        Ok(Ok(bytes)) => Outcome::Output(match ownership {
            Ownership::Caller => HeldOutput::Caller(Some(bytes)),
            Ownership::Engine => HeldOutput::Engine(bytes.into()),
        }),
        Ok(Err(e)) => {
            debug!(promise = %id, error = %e, "Crypto operation failed");
            Outcome::Failed(Failure::Crypto(CryptoOperationError::Failed(e.to_string())))
        }
        Err(e) => {
            warn!(promise = %id, error = %e, "Crypto worker did not finish");
            Outcome::Failed(Failure::Crypto(CryptoOperationError::Failed(format!(
                "worker task failed: {e}"
            ))))
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use tokio::runtime::Runtime;

    use super::*;
    use crate::status::Timeout;

    struct Fixture {
        runtime: Runtime,
        registry: Arc<PromiseRegistry>,
        engine: CryptoEngine,
        identity: Arc<IdentityKeyPair>,
    }

    impl Fixture {
        fn new() -> Self {
            let runtime = Runtime::new().unwrap();
            let registry = Arc::new(PromiseRegistry::new());
            let engine = CryptoEngine::new(Arc::clone(&registry), runtime.handle().clone());
            Self {
                runtime,
                registry,
                engine,
                identity: Arc::new(IdentityKeyPair::generate()),
            }
        }

        /// A finished search that resolved to this fixture's identity.
        fn resolved(&self) -> ResolvedIdentity {
            let search = self.registry.issue(PromiseKind::Search);
            let found =
                ResolvedIdentity::for_tests(search, "alice", self.identity.public_identity());
            self.registry
                .complete(search, Outcome::Resolved(found.clone()));
            found
        }

        fn wait(&self, id: PromiseId) -> crate::status::PromiseStatus {
            self.runtime
                .block_on(self.registry.wait(id, Timeout::Infinite))
                .unwrap()
        }
    }

    #[test]
    fn engine_output_is_held_until_concluded() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let id = fx
            .engine
            .encrypt(&recipient, b"held by the engine", None, Ownership::Engine);
        assert!(fx.wait(id).has_data());
        assert!(fx.engine.output_exists(id).unwrap());

        let OutputBuffer::Engine(view) = fx.engine.output(id).unwrap() else {
            panic!("expected engine-owned output");
        };
        assert_eq!(view.promise(), id);
        assert_eq!(fx.registry.engine_held_bytes(), view.len());
        // Engine output can be viewed more than once.
        assert!(fx.engine.output(id).is_ok());

        fx.engine.conclude(id).unwrap();
        assert_eq!(fx.registry.engine_held_bytes(), 0);
        assert!(matches!(
            fx.engine.conclude(id),
            Err(Error::Ownership(OwnershipViolation::StaleHandle(_)))
        ));
    }

    #[test]
    fn caller_output_is_moved_out_once() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let sealed = fx
            .engine
            .encrypt(&recipient, b"secret", Some("pw"), Ownership::Caller);
        fx.wait(sealed);
        let blob: Arc<[u8]> = fx.engine.output(sealed).unwrap().as_slice().into();
        fx.engine.conclude(sealed).unwrap();

        let opened = fx.engine.decrypt(
            Arc::clone(&fx.identity),
            InputBuffer::CallerOwned(blob),
            Some("pw"),
            Ownership::Caller,
        );
        assert!(fx.wait(opened).has_data());
        let plaintext = fx.engine.output(opened).unwrap();
        assert_eq!(plaintext.as_slice(), b"secret");
        assert_eq!(plaintext.ownership(), Ownership::Caller);

        assert!(!fx.engine.output_exists(opened).unwrap());
        assert!(matches!(
            fx.engine.output(opened),
            Err(Error::Ownership(OwnershipViolation::OutputAlreadyTaken(_)))
        ));
        fx.engine.conclude(opened).unwrap();
    }

    #[test]
    fn released_recipient_fails_the_encrypt() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        fx.registry.release(recipient.promise()).unwrap();

        let id = fx.engine.encrypt(&recipient, b"late", None, Ownership::Caller);
        let status = fx.registry.status(id).unwrap();
        assert!(status.is_terminal());
        assert!(!status.has_data());
        assert!(matches!(
            fx.engine.output(id),
            Err(Error::Crypto(CryptoOperationError::InvalidStatus { .. }))
        ));
    }

    #[test]
    fn empty_plaintext_fails_without_running() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let id = fx.engine.encrypt(&recipient, b"", None, Ownership::Engine);
        assert!(!fx.registry.status(id).unwrap().has_data());
        assert!(!fx.engine.output_exists(id).unwrap());
    }

    #[test]
    fn wrong_identity_cannot_open() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let sealed = fx.engine.encrypt(&recipient, b"for alice", None, Ownership::Caller);
        fx.wait(sealed);
        let blob = fx.engine.output(sealed).unwrap();

        let opened = fx.engine.decrypt(
            Arc::new(IdentityKeyPair::generate()),
            InputBuffer::EngineCopy(blob.as_slice()),
            None,
            Ownership::Caller,
        );
        let status = fx.wait(opened);
        assert!(status.is_terminal());
        assert!(!status.has_data());
    }

    #[test]
    fn decrypt_validity_follows_authentication() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let sealed = fx.engine.encrypt(&recipient, b"check me", None, Ownership::Engine);
        fx.wait(sealed);
        let blob = fx.engine.output(sealed).unwrap();

        let good = fx.engine.decrypt(
            Arc::clone(&fx.identity),
            InputBuffer::EngineCopy(blob.as_slice()),
            None,
            Ownership::Caller,
        );
        fx.wait(good);
        assert!(fx.engine.decrypt_is_valid(good).unwrap());
        fx.engine.output(good).unwrap();
        assert!(fx.engine.decrypt_is_valid(good).unwrap());

        let mut tampered = blob.as_slice().to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        let bad = fx.engine.decrypt(
            Arc::clone(&fx.identity),
            InputBuffer::CallerOwned(tampered.into()),
            None,
            Ownership::Caller,
        );
        fx.wait(bad);
        assert!(!fx.engine.decrypt_is_valid(bad).unwrap());

        assert!(matches!(
            fx.engine.decrypt_is_valid(sealed),
            Err(Error::Ownership(OwnershipViolation::WrongKind { .. }))
        ));
    }

    #[test]
    fn envelope_header_names_the_recipient() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        let plain = fx.engine.encrypt(&recipient, b"open", None, Ownership::Engine);
        let locked = fx
            .engine
            .encrypt(&recipient, b"locked", Some("pw"), Ownership::Caller);
        fx.wait(plain);
        fx.wait(locked);

        let header = fx.engine.envelope_header(plain).unwrap();
        assert_eq!(
            header.recipient_fingerprint,
            fx.identity.public_identity().fingerprint_bytes()
        );
        assert!(!header.is_password_protected());
        assert!(
            fx.engine
                .envelope_header(locked)
                .unwrap()
                .is_password_protected()
        );

        fx.engine.output(locked).unwrap();
        assert!(matches!(
            fx.engine.envelope_header(locked),
            Err(Error::Ownership(OwnershipViolation::OutputAlreadyTaken(_)))
        ));
        assert!(matches!(
            fx.engine.envelope_header(recipient.promise()),
            Err(Error::Ownership(OwnershipViolation::WrongKind { .. }))
        ));
    }

    #[test]
    fn search_promises_cannot_be_concluded() {
        let fx = Fixture::new();
        let recipient = fx.resolved();
        assert!(matches!(
            fx.engine.conclude(recipient.promise()),
            Err(Error::Ownership(OwnershipViolation::WrongKind { .. }))
        ));
        assert!(matches!(
            fx.engine.output(recipient.promise()),
            Err(Error::Ownership(OwnershipViolation::WrongKind { .. }))
        ));
        fx.registry.release(recipient.promise()).unwrap();
    }
}
