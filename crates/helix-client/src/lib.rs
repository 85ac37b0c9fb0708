//! Helix session client.
//!
//! Asynchronous, promise-based client for the Helix key server:
//!
//! - [`session`]: module lifecycle, key-server connection, account bootstrap
//! - [`promise`]: registry of outstanding operations and their status flags
//! - [`directory`]: recipient lookup by account name or email
//! - [`engine`]: envelope encryption and decryption as background tasks
//! - [`buffer`]: caller- vs engine-owned input and output buffers
//!
//! ```no_run
//! use helix_client::{InputBuffer, Ownership, Session, StartupOptions, Timeout};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let session = Session::startup(StartupOptions::new("service.blakfx.us", 5567))?;
//! session.connect()?;
//! session.authenticate("alice")?;
//!
//! let search = session.resolve_by_name("alice", Timeout::millis(5000))?;
//! session.wait(search, Timeout::millis(5000))?;
//! let recipient = session.resolved_identity(search)?;
//!
//! let sealed = session.encrypt(&recipient, b"hello", None, Ownership::Caller);
//! session.wait(sealed, Timeout::Infinite)?;
//! let blob = session.output(sealed)?.into_vec();
//! session.conclude(sealed)?;
//!
//! let opened = session.decrypt(InputBuffer::CallerOwned(blob.into()), None, Ownership::Engine)?;
//! session.wait(opened, Timeout::Infinite)?;
//! assert_eq!(session.output(opened)?.as_slice(), b"hello");
//! session.conclude(opened)?;
//! session.release(search)?;
//! session.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod account;
pub mod buffer;
pub mod connection;
pub mod device;
pub mod directory;
mod engine;
pub mod error;
pub mod promise;
pub mod session;
pub mod status;

pub use account::{AuthState, MAX_ACCOUNT_NAME_LEN};
pub use buffer::{EngineBuffer, InputBuffer, OutputBuffer, Ownership};
pub use device::Device;
pub use directory::{Query, ResolvedIdentity};
pub use error::{
    AuthError, ConnectionError, CryptoOperationError, Error, ErrorCategory, OwnershipViolation,
    ResolutionError, Result, StartupError,
};
pub use promise::{PromiseId, PromiseKind};
pub use session::{
    ConnectionState, ModuleState, Session, ShutdownSummary, StartupOptions,
};
pub use status::{PromiseStatus, Timeout};

pub use helix_crypto::EnvelopeHeader;
