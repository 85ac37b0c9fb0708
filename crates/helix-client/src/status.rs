//! Promise status flags and wait timeouts.

use std::fmt;
use std::ops::BitOr;
use std::time::Duration;

/// Bitset describing where a promise is in its lifecycle.
///
/// A fresh promise is `NO_STATUS`; once a worker picks it up it becomes
/// `WAIT_STATUS`; a terminal promise always carries `COMPLETE` together with
/// either `DATA_AVAILABLE` or `RESULT_ERROR`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PromiseStatus(u32);

impl PromiseStatus {
    pub const COMPLETE: Self = Self(0x0001);
    pub const DATA_AVAILABLE: Self = Self(0x0004);
    pub const RESULT_ERROR: Self = Self(0x0020);
    pub const NO_STATUS: Self = Self(0x2000);
    pub const WAIT_STATUS: Self = Self(0x4000);
    /// Set alongside `RESULT_ERROR` when the outcome is unknown, e.g. the
    /// connection dropped or the session shut down mid-flight.
    pub const ERROR_UNDEFINED: Self = Self(0x8000);

    const NAMED: [(Self, &'static str); 6] = [
        (Self::COMPLETE, "COMPLETE"),
        (Self::DATA_AVAILABLE, "DATA_AVAILABLE"),
        (Self::RESULT_ERROR, "RESULT_ERROR"),
        (Self::NO_STATUS, "NO_STATUS"),
        (Self::WAIT_STATUS, "WAIT_STATUS"),
        (Self::ERROR_UNDEFINED, "ERROR_UNDEFINED"),
    ];

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Build from raw bits, dropping unknown ones.
    pub const fn from_bits_truncate(bits: u32) -> Self {
        Self(bits & 0xE025)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_terminal(self) -> bool {
        self.contains(Self::COMPLETE)
    }

    /// Result is readable: data present and no error flagged.
    pub const fn has_data(self) -> bool {
        self.contains(Self::DATA_AVAILABLE) && !self.contains(Self::RESULT_ERROR)
    }

    pub const fn is_error(self) -> bool {
        self.contains(Self::RESULT_ERROR)
    }

    pub(crate) const fn succeeded() -> Self {
        Self(Self::COMPLETE.0 | Self::DATA_AVAILABLE.0)
    }

    pub(crate) const fn failed(undefined: bool) -> Self {
        if undefined {
            Self(Self::COMPLETE.0 | Self::RESULT_ERROR.0 | Self::ERROR_UNDEFINED.0)
        } else {
            Self(Self::COMPLETE.0 | Self::RESULT_ERROR.0)
        }
    }
}

impl BitOr for PromiseStatus {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for PromiseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PromiseStatus({self})")
    }
}

impl fmt::Display for PromiseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (flag, name) in Self::NAMED {
            if self.contains(flag) {
                if !first {
                    f.write_str(" | ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("EMPTY")?;
        }
        Ok(())
    }
}

/// How long a wait may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Block until the promise is terminal. Meant for local work the engine
    /// always finishes, not for network-bound searches.
    Infinite,
    After(Duration),
}

impl Timeout {
    pub const fn millis(ms: u64) -> Self {
        Self::After(Duration::from_millis(ms))
    }

    pub const fn is_zero(self) -> bool {
        matches!(self, Self::After(d) if d.is_zero())
    }

    pub const fn as_duration(self) -> Option<Duration> {
        match self {
            Self::Infinite => None,
            Self::After(d) => Some(d),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Self::After(d)
    }
}
