//! Supported serial baud rates.
//!
//! The device side is always 8 data bits, 1 stop bit, no parity; only the
//! rate varies.  [`BaudRate`] can only hold a value from [`SUPPORTED`], so a
//! connection can never be opened at an unsupported rate.

use std::fmt;
use std::str::FromStr;

/// Every rate the connection manager accepts, in ascending order.
pub const SUPPORTED: [u32; 15] = [
    300, 1200, 2400, 4800, 9600, 14400, 19200, 28800, 38400, 57600, 115200, 230400, 250000,
    500000, 1000000,
];

/// A validated baud rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BaudRate(u32);

impl BaudRate {
    /// 9600 baud, the rate most sketches call `Serial.begin()` with.
    pub const DEFAULT: BaudRate = BaudRate(9600);

    /// Returns `Some` if `rate` is in [`SUPPORTED`].
    pub fn new(rate: u32) -> Option<Self> {
        SUPPORTED.contains(&rate).then_some(BaudRate(rate))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for BaudRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a string could not become a [`BaudRate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaudError {
    /// Not a decimal integer at all.
    NotANumber(String),
    /// A number, but not one of [`SUPPORTED`].
    Unsupported(u64),
}

impl fmt::Display for BaudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaudError::NotANumber(s) => write!(f, "invalid baud rate: {s:?}"),
            BaudError::Unsupported(n) => {
                write!(f, "unsupported baud rate {n} (supported: {})", supported_list())
            }
        }
    }
}

impl std::error::Error for BaudError {}

impl FromStr for BaudRate {
    type Err = BaudError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let n: u64 = s.parse().map_err(|_| BaudError::NotANumber(s.to_owned()))?;
        u32::try_from(n)
            .ok()
            .and_then(BaudRate::new)
            .ok_or(BaudError::Unsupported(n))
    }
}

/// The supported rates as a comma-separated list, for help and error text.
pub fn supported_list() -> String {
    SUPPORTED
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ── Tests ─────────────────────────────────────────────────────────────────────
