//! Input and output buffer ownership.
//!
//! Callers choose who owns the bytes of every crypto operation. Inputs are
//! either handed over as a shared allocation the engine reads in place, or
//! borrowed and copied into engine storage. Outputs are either moved to the
//! caller on retrieval, or kept by the engine and lent out as a read-only view
//! until the promise is concluded.

use std::ops::Deref;
use std::sync::Arc;

use crate::error::CryptoOperationError;
use crate::promise::PromiseId;

/// Who owns an operation's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ownership {
    /// The output is moved to the caller on first retrieval.
    #[default]
    Caller,
    /// The engine keeps the output until the promise is concluded.
    Engine,
}

/// Bytes handed to a crypto operation.
#[derive(Debug, Clone)]
pub enum InputBuffer<'a> {
    /// Caller-owned allocation, read in place and never copied.
    CallerOwned(Arc<[u8]>),
    /// Borrowed bytes the engine copies before returning.
    EngineCopy(&'a [u8]),
}

impl InputBuffer<'_> {
    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::CallerOwned(bytes) => bytes,
            Self::EngineCopy(bytes) => bytes,
        }
    }

    /// Storage the worker can hold past the call. Caller-owned input keeps
    /// its allocation; borrowed input is copied once.
    pub(crate) fn into_shared(self) -> Arc<[u8]> {
        match self {
            Self::CallerOwned(bytes) => bytes,
            Self::EngineCopy(bytes) => Arc::from(bytes),
        }
    }
}

impl<'a> From<&'a [u8]> for InputBuffer<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::EngineCopy(bytes)
    }
}

impl From<Arc<[u8]>> for InputBuffer<'_> {
    fn from(bytes: Arc<[u8]>) -> Self {
        Self::CallerOwned(bytes)
    }
}

impl From<Vec<u8>> for InputBuffer<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::CallerOwned(bytes.into())
    }
}

/// Read-only view of an engine-owned output.
///
/// The view stays readable after the promise is concluded, but the engine no
/// longer accounts for the bytes once it has let go of them.
#[derive(Debug, Clone)]
pub struct EngineBuffer {
    promise: PromiseId,
    bytes: Arc<[u8]>,
}

impl EngineBuffer {
    pub(crate) const fn new(promise: PromiseId, bytes: Arc<[u8]>) -> Self {
        Self { promise, bytes }
    }

    /// Promise that produced this output.
    pub const fn promise(&self) -> PromiseId {
        self.promise
    }
}

impl Deref for EngineBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsRef<[u8]> for EngineBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// Output of a finished encrypt or decrypt.
#[derive(Debug, Clone)]
pub enum OutputBuffer {
    Caller(Vec<u8>),
    Engine(EngineBuffer),
}

impl OutputBuffer {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            Self::Caller(bytes) => bytes,
            Self::Engine(view) => view,
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub const fn ownership(&self) -> Ownership {
        match self {
            Self::Caller(_) => Ownership::Caller,
            Self::Engine(_) => Ownership::Engine,
        }
    }

    /// Copy out (engine-owned) or move out (caller-owned) the bytes.
    pub fn into_vec(self) -> Vec<u8> {
        match self {
            Self::Caller(bytes) => bytes,
            Self::Engine(view) => view.to_vec(),
        }
    }

    /// Fail with `SizeMismatch` unless the output is exactly `expected` bytes.
    pub fn expect_len(&self, expected: usize) -> Result<(), CryptoOperationError> {
        let actual = self.len();
        if actual == expected {
            Ok(())
        } else {
            Err(CryptoOperationError::SizeMismatch { expected, actual })
        }
    }
}

impl AsRef<[u8]> for OutputBuffer {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
