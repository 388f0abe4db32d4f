//! Crate-wide error type.
//!
//! Parse failures get dedicated variants so callers can tell "bad token"
//! (usage abort at the argument level, silent discard at the control-file
//! level) apart from structural failures that must surface.

use std::io;

use thiserror::Error;

/// Errors produced by the timing engine.
#[derive(Debug, Error)]
pub enum Error {
    /// A duration/rate token did not match the grammar or exceeded bounds.
    #[error("invalid duration {0:?}")]
    BadInterval(String),

    /// A quantity token did not match the grammar.
    #[error("invalid quantity {0:?}")]
    BadQuantity(String),

    /// An `N@holdtime` parameter was malformed or N was out of 1..=256.
    #[error("invalid hold parameter {0:?}")]
    BadHoldSpec(String),

    /// A first-field timestamp could not be parsed in the selected format.
    #[error("unparsable timestamp field {0:?}")]
    BadTimestamp(String),

    /// A `-t`/`-i` argument on the timed head was malformed.
    #[error("invalid time bound {0:?}")]
    BadBound(String),

    /// The control file is neither regular, FIFO nor character-special.
    #[error("unsupported control file type for {0:?}")]
    ControlFileType(String),

    /// Real-time priority could not be obtained at any class.
    #[error("real-time priority unavailable")]
    Priority,

    /// An I/O failure, tagged with the role of the stream it hit.
    #[error("{role}: {source}")]
    Io {
        role: &'static str,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// Wrap an `io::Error` with the role of the stream that produced it
    /// ("stdin", "stdout", "drain", "control file", ...).
    pub fn io(role: &'static str, source: io::Error) -> Self {
        Error::Io { role, source }
    }

    /// The raw OS errno behind this error, if there is one.
    pub fn os_errno(&self) -> Option<i32> {
        match self {
            Error::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
