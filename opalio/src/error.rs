// SPDX-License-Identifier: MIT

use core::fmt;

/// Result type for OpalIO operations.
pub type OpalIOResult<T = ()> = core::result::Result<T, OpalIOError>;

/// Error type for OpalIO operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpalIOError {
    /// Underlying device I/O error.
    Error(&'static str),

    /// Attempted to read or write out of bounds.
    OutOfBounds,

    /// Unsupported operation for this backend.
    Unsupported,
}

impl OpalIOError {
    pub fn msg(&self) -> &'static str {
        match self {
            OpalIOError::Error(msg) => msg,
            OpalIOError::OutOfBounds => "Out of bounds",
            OpalIOError::Unsupported => "Unsupported operation",
        }
    }
}

impl fmt::Display for OpalIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())
    }
}
