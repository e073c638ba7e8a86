//! Codec error types.

use std::io;

use thiserror::Error;

/// Errors raised while reading or writing patch files.
///
/// Every variant aborts the load of the affected patch. Recoverable data
/// quality problems are logged as warnings instead and never surface here.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("not a patch file (token {found:#010X})")]
    BadToken { found: u32 },

    #[error("unsupported file version {found} (expected {expected})")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("missing required entry '{0}'")]
    MissingSection(&'static str),

    #[error("expected {expected} values, found {found}")]
    ValueCount { expected: usize, found: usize },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("unsupported patch file: {0}")]
    UnsupportedKind(String),
}

impl CodecError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        CodecError::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        CodecError::InvalidData(message.into())
    }
}
