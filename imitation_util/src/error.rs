//! Error types for imitation utilities.

use std::fmt;
use std::io;

/// Result type for imitation utility operations.
pub type Result<T> = std::result::Result<T, UtilError>;

/// Error types that can occur in the utilities.
#[derive(Debug)]
pub enum UtilError {
    /// An argument is outside its valid domain (decay not in (0, 1), p = 0, ...).
    InvalidArgument {
        param: &'static str,
        message: String,
    },
    /// Input shape does not match what the operation expects.
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    /// An iterable had no elements to iterate over.
    EmptyIterable,
    /// IO error (monitor log files).
    Io(io::Error),
}

impl UtilError {
    /// Shorthand for [`UtilError::InvalidArgument`].
    pub fn invalid(param: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            param,
            message: message.into(),
        }
    }
}

impl fmt::Display for UtilError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { param, message } => {
                write!(f, "Invalid argument '{}': {}", param, message)
            }
            Self::ShapeMismatch { expected, actual } => {
                write!(f, "Shape mismatch: expected {:?}, got {:?}", expected, actual)
            }
            Self::EmptyIterable => write!(f, "iterable had no elements to iterate over"),
            Self::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for UtilError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for UtilError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
