//! Recipient lookup against the key server directory.

use std::fmt;
use std::time::Duration;

use helix_crypto::{PublicIdentity, verify_fingerprint};
use helix_proto::{DirectoryEntry, RequestBody, ResponseBody, SearchQuery};
use tracing::{debug, info};

use crate::connection::KeyServerConnection;
use crate::error::{ConnectionError, ResolutionError};
use crate::promise::{Failure, PromiseId};
use crate::status::Timeout;

/// What to look a recipient up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Name(String),
    Email(String),
}

impl Query {
    fn to_wire(&self) -> SearchQuery {
        match self {
            Self::Name(name) => SearchQuery::Name(name.clone()),
            Self::Email(email) => SearchQuery::Email(email.clone()),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name {name:?}"),
            Self::Email(email) => write!(f, "email {email:?}"),
        }
    }
}

/// A recipient found on the key server.
///
/// Only usable for encryption while the search promise that produced it is
/// still live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    promise: PromiseId,
    query: Query,
    account: String,
    email: Option<String>,
    public_key: PublicIdentity,
}

impl ResolvedIdentity {
    /// Search promise this identity belongs to.
    pub const fn promise(&self) -> PromiseId {
        self.promise
    }

    pub const fn query(&self) -> &Query {
        &self.query
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub const fn public_key(&self) -> &PublicIdentity {
        &self.public_key
    }

    pub fn fingerprint(&self) -> String {
        self.public_key.fingerprint()
    }

    #[cfg(test)]
    pub(crate) fn for_tests(
        promise: PromiseId,
        account: &str,
        public_key: PublicIdentity,
    ) -> Self {
        Self {
            promise,
            query: Query::Name(account.to_string()),
            account: account.to_string(),
            email: None,
            public_key,
        }
    }
}

/// Run one search on `conn`, bounded by `timeout`.
pub(crate) async fn search(
    conn: &KeyServerConnection,
    promise: PromiseId,
    query: Query,
    timeout: Timeout,
) -> Result<ResolvedIdentity, Failure> {
    if timeout.is_zero() {
        return Err(timed_out(&query, Duration::ZERO));
    }

    debug!(%promise, %query, ?timeout, "Searching directory");
    let reply = conn
        .request_within(
            RequestBody::Search {
                query: query.to_wire(),
            },
            timeout.as_duration(),
        )
        .await;

    match reply {
        Ok(ResponseBody::Found { entry }) => {
            let (account, email, public_key) = verify_entry(entry)?;
            info!(%promise, %query, %account, "Recipient resolved");
            Ok(ResolvedIdentity {
                promise,
                query,
                account,
                email,
                public_key,
            })
        }
        Ok(ResponseBody::NotFound) => Err(Failure::Resolution(ResolutionError::NotFound(
            query.to_string(),
        ))),
        Ok(ResponseBody::Error { code, message }) => Err(Failure::Resolution(
            ResolutionError::Failed(format!("{code}: {message}")),
        )),
        Ok(other) => Err(Failure::Connection(ConnectionError::Protocol(format!(
            "unexpected reply to search: {other:?}"
        )))),
        Err(ConnectionError::Timeout(after)) => Err(timed_out(&query, after)),
        Err(e) => Err(Failure::Connection(e)),
    }
}

pub(crate) fn timed_out(query: &Query, after: Duration) -> Failure {
    Failure::Resolution(ResolutionError::Timeout {
        query: query.to_string(),
        after,
    })
}

/// Check that the advertised key is well formed and matches its fingerprint.
fn verify_entry(
    entry: DirectoryEntry,
) -> Result<(String, Option<String>, PublicIdentity), Failure> {
    let public_key = PublicIdentity::from_hex(&entry.public_key).map_err(|e| {
        Failure::Resolution(ResolutionError::Failed(format!(
            "server sent an invalid key for {}: {e}",
            entry.name
        )))
    })?;
    if !verify_fingerprint(public_key.as_bytes(), &entry.fingerprint) {
        return Err(Failure::Resolution(ResolutionError::Failed(format!(
            "fingerprint mismatch for {}",
            entry.name
        ))));
    }
    Ok((entry.name, entry.email, public_key))
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use helix_crypto::IdentityKeyPair;

    use super::*;

    fn entry_for(identity: &IdentityKeyPair) -> DirectoryEntry {
        let public = identity.public_identity();
        DirectoryEntry {
            name: "alice".into(),
            email: Some("alice@example.com".into()),
            public_key: public.to_hex(),
            fingerprint: public.fingerprint(),
        }
    }

    #[test]
    fn valid_entry_is_accepted() {
        let identity = IdentityKeyPair::generate();
        let (name, email, key) = verify_entry(entry_for(&identity)).unwrap();
        assert_eq!(name, "alice");
        assert_eq!(email.as_deref(), Some("alice@example.com"));
        assert_eq!(key, identity.public_identity());
    }

    #[test]
    fn fingerprint_mismatch_is_rejected() {
        let identity = IdentityKeyPair::generate();
        let mut entry = entry_for(&identity);
        entry.fingerprint = IdentityKeyPair::generate().fingerprint();
        assert!(matches!(
            verify_entry(entry),
            Err(Failure::Resolution(ResolutionError::Failed(_)))
        ));
    }

    #[test]
    fn short_key_is_rejected() {
        let identity = IdentityKeyPair::generate();
        let mut entry = entry_for(&identity);
        entry.public_key = "abcd".into();
        assert!(verify_entry(entry).is_err());
    }

    #[test]
    fn query_display_names_the_field() {
        assert_eq!(Query::Name("bob".into()).to_string(), "name \"bob\"");
        assert_eq!(
            Query::Email("b@x.io".into()).to_string(),
            "email \"b@x.io\""
        );
    }
}
