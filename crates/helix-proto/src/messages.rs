//! Wire messages.
//!
//! Keys travel as lowercase hex so every message stays plain JSON.

use serde::{Deserialize, Serialize};

/// Current protocol version. Both sides must agree exactly.
pub const PROTOCOL_VERSION: u32 = 1;

/// Plaintext messages exchanged before the channel key exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Handshake {
    Hello {
        protocol_version: u32,
        device_id: String,
        ephemeral_public_key: String,
    },
    Welcome {
        protocol_version: u32,
        server_id: String,
        ephemeral_public_key: String,
        identity_public_key: String,
    },
    Reject {
        reason: String,
    },
}

/// Client to server, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub body: RequestBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RequestBody {
    /// Register `name` with `public_key`.
    AccountCreate {
        name: String,
        email: Option<String>,
        public_key: String,
    },
    /// Prove possession of the registered key for `name`.
    AccountLogin { name: String, public_key: String },
    AccountDelete { name: String, public_key: String },
    Search { query: SearchQuery },
    Ping,
}

impl RequestBody {
    /// Short operation name for logs.
    pub const fn op(&self) -> &'static str {
        match self {
            Self::AccountCreate { .. } => "account_create",
            Self::AccountLogin { .. } => "account_login",
            Self::AccountDelete { .. } => "account_delete",
            Self::Search { .. } => "search",
            Self::Ping => "ping",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchQuery {
    Name(String),
    Email(String),
}

/// Server to client; `id` echoes the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub body: ResponseBody,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ResponseBody {
    Ok,
    Found { entry: DirectoryEntry },
    NotFound,
    Pong,
    Error { code: ErrorCode, message: String },
}

/// One published account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub email: Option<String>,
    /// Hex X25519 public key.
    pub public_key: String,
    /// Colon-separated SHA-256 fingerprint of `public_key`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NameTaken,
    UnknownAccount,
    KeyMismatch,
    NotLoggedIn,
    InvalidRequest,
    Internal,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NameTaken => "name_taken",
            Self::UnknownAccount => "unknown_account",
            Self::KeyMismatch => "key_mismatch",
            Self::NotLoggedIn => "not_logged_in",
            Self::InvalidRequest => "invalid_request",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_wire_shape() {
        let req = Request {
            id: 7,
            body: RequestBody::Search {
                query: SearchQuery::Email("a@example.com".into()),
            },
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["body"]["op"], "search");
        assert_eq!(json["body"]["query"]["email"], "a@example.com");
    }

    #[test]
    fn ping_has_no_payload() {
        let json = serde_json::to_string(&RequestBody::Ping).unwrap();
        assert_eq!(json, r#"{"op":"ping"}"#);
    }

    #[test]
    fn error_response_carries_code() {
        let resp = Response {
            id: 1,
            body: ResponseBody::Error {
                code: ErrorCode::NameTaken,
                message: "taken".into(),
            },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["body"]["result"], "error");
        assert_eq!(json["body"]["code"], "name_taken");

        let back: Response = serde_json::from_value(json).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn handshake_is_tagged_by_type() {
        let json = r#"{"type":"reject","reason":"busy"}"#;
        let msg: Handshake = serde_json::from_str(json).unwrap();
        assert_eq!(msg, Handshake::Reject { reason: "busy".into() });
    }

    #[test]
    fn unknown_op_is_rejected() {
        let json = r#"{"id":1,"body":{"op":"drop_tables"}}"#;
        assert!(serde_json::from_str::<Request>(json).is_err());
    }
}
