//! Error types for archive reading and writing.
//!
//! Failures fall into two families:
//!
//! - [`FormatError`]: the byte stream is not a well-formed ZIP archive that this
//!   crate supports. Retrying with the same input will fail the same way.
//! - [`Error::Io`]: the underlying channel failed. Whether a retry makes sense is
//!   up to the caller.
//!
//! Parsing failures abort [`Archive::open`](crate::Archive::open) as a whole.
//! Failures while decompressing one entry are scoped to that entry.

use std::io;

use thiserror::Error;

/// The archive bytes are malformed or use a feature this crate does not support.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum FormatError {
    /// No end of central directory record in the trailing search window.
    #[error("end of central directory record not found")]
    NoCentralDirectory,

    /// A record is truncated, has a bad signature or points outside the archive.
    #[error("corrupt entry at offset {offset:#x}: {reason}")]
    CorruptEntry { offset: u64, reason: String },

    /// The decompressed bytes do not hash to the stored CRC-32.
    #[error("CRC-32 mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The entry uses a compression method with no codec.
    #[error("unsupported compression method {0}")]
    UnsupportedMethod(u16),

    /// The codec rejected the compressed stream.
    #[error("codec error: {0}")]
    CodecError(String),

    /// Zip64 structures are required but missing or unusable.
    #[error("unsupported zip64 layout: {0}")]
    UnsupportedZip64(String),

    /// The archive spans several volumes.
    #[error("multi-volume archives are not supported")]
    MultiVolume,

    /// The entry is encrypted.
    #[error("encrypted entries are not supported")]
    Encrypted,
}

impl FormatError {
    pub(crate) fn corrupt(offset: u64, reason: impl Into<String>) -> Self {
        FormatError::CorruptEntry {
            offset,
            reason: reason.into(),
        }
    }
}

/// Any failure reported by this crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(io::Error),

    /// An entry handed to the writer cannot be represented in a ZIP archive.
    #[error("invalid entry {path:?}: {reason}")]
    InvalidEntry { path: String, reason: &'static str },
}

impl Error {
    /// Only channel failures may succeed on a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// The format error behind this error, if any.
    pub fn as_format(&self) -> Option<&FormatError> {
        match self {
            Error::Format(e) => Some(e),
            _ => None,
        }
    }
}

// Streaming readers can only return `io::Error`, so format errors travel
// wrapped inside one. Unwrap them again here.
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.get_ref().is_some_and(|inner| inner.is::<FormatError>()) {
            let kind = err.kind();
            if let Some(inner) = err.into_inner() {
                return match inner.downcast::<FormatError>() {
                    Ok(format) => Error::Format(*format),
                    Err(other) => Error::Io(io::Error::new(kind, other)),
                };
            }
            return Error::Io(io::Error::from(kind));
        }
        Error::Io(err)
    }
}

impl From<FormatError> for io::Error {
    fn from(err: FormatError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, err)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_error_survives_io_wrapping() {
        let wrapped: io::Error = FormatError::ChecksumMismatch {
            expected: 1,
            actual: 2,
        }
        .into();
        let err = Error::from(wrapped);
        assert!(matches!(
            err,
            Error::Format(FormatError::ChecksumMismatch {
                expected: 1,
                actual: 2
            })
        ));
        assert!(!err.is_retryable());
    }

    #[test]
    fn plain_io_error_is_retryable() {
        let err = Error::from(io::Error::new(io::ErrorKind::BrokenPipe, "gone"));
        assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::BrokenPipe));
        assert!(err.is_retryable());
        assert!(err.as_format().is_none());
    }

    #[test]
    fn corrupt_entry_message_mentions_offset() {
        let err = FormatError::corrupt(0x40, "bad signature");
        assert_eq!(err.to_string(), "corrupt entry at offset 0x40: bad signature");
    }
}
