//! Helix key-server protocol.
//!
//! A connection starts with a plaintext handshake that agrees on a channel
//! key, after which every frame carries one sealed JSON message:
//!
//! - [`codec`]: 4-byte big-endian length-prefixed frames
//! - [`messages`]: handshake, request and response types
//! - [`channel`]: handshake drivers and the encrypted reader/writer halves

pub mod channel;
pub mod codec;
pub mod error;
pub mod messages;

pub use channel::{ChannelReader, ChannelWriter, ClientHello, ServerInfo};
pub use codec::MAX_FRAME_SIZE;
pub use error::ProtoError;
pub use messages::{
    DirectoryEntry, ErrorCode, Handshake, PROTOCOL_VERSION, Request, RequestBody, Response,
    ResponseBody, SearchQuery,
};
