//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before the value was complete.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// A varint ran past its maximum length or overflowed 64 bits.
    #[error("invalid varint")]
    InvalidVarint,

    /// A string field held bytes that are not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A length or integer field exceeds what the target type can hold.
    #[error("value out of range: {message}")]
    OutOfRange {
        /// Description of the offending field.
        message: String,
    },

    /// Bytes remained after a value that should have consumed the whole
    /// input.
    #[error("trailing bytes after value: {remaining} left")]
    TrailingBytes {
        /// Number of unconsumed bytes.
        remaining: usize,
    },

    /// The encoded structure is malformed.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },
}

impl CodecError {
    /// Creates an out-of-range error.
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// Creates an invalid-structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}
