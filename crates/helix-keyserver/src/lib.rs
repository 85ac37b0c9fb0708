//! Helix Key Server Library
//!
//! Account directory served over the Helix encrypted channel:
//! - In-memory directory with per-device name ownership
//! - TCP accept loop, per-connection login state, concurrent searches

pub mod directory;
pub mod server;

pub use directory::{Account, Directory, DirectoryError};
pub use server::{KeyServer, KeyServerOptions};
