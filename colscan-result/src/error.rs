use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all colscan operations.
///
/// Errors propagate with `?`. The scan driver inspects [`Error::is_terminal`] to
/// decide whether a failure ends the scan cleanly (end of file, cooperative
/// stop) or moves it into the failed state.
#[derive(Error, Debug)]
pub enum Error {
    /// The reader has no more rows to produce.
    ///
    /// This is a normal condition. It is returned by internal helpers and
    /// translated into an `eof` flag at the public boundary.
    #[error("end of file")]
    EndOfFile,

    /// The source file does not exist.
    ///
    /// Callers commonly treat this as "skip this file".
    #[error("file not found: {0}")]
    NotFound(String),

    /// The requested column type cannot be produced from the on-file column.
    ///
    /// Raised when no converter exists between the two types, when a
    /// conversion overflows the requested type, or when a non-nullable
    /// requested column contains nulls.
    #[error("schema mismatch for column '{column}': {message}")]
    SchemaMismatch { column: String, message: String },

    /// Malformed page, offset index, dictionary, or footer.
    ///
    /// Decode errors inside a row group abort the scan. Corruption found in
    /// optional metadata (statistics, page index) is logged and ignored by the
    /// callers that can fall back to reading the whole row group.
    #[error("corrupt data: {0}")]
    CorruptData(String),

    /// A cooperative stop was requested while reading.
    ///
    /// Treated exactly like [`Error::EndOfFile`] by the scan driver.
    #[error("scan cancelled")]
    Cancelled,

    /// I/O failure from the byte-range reader, with the file path attached.
    #[error("I/O error reading '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: io::Error,
    },

    /// I/O error without path context.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error while building arrays or running compute kernels.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid caller input, such as a conjunct referencing an unknown column.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// An internal invariant was violated.
    #[error("An internal operation failed: {0}")]
    Internal(String),
}

impl Error {
    /// Build a [`Error::CorruptData`] from any displayable value.
    #[inline]
    pub fn corrupt<E: fmt::Display>(err: E) -> Self {
        Error::CorruptData(err.to_string())
    }

    /// Build a [`Error::SchemaMismatch`] for `column`.
    #[inline]
    pub fn schema_mismatch(column: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::SchemaMismatch {
            column: column.into(),
            message: message.to_string(),
        }
    }

    /// Attach a file path to an I/O error.
    ///
    /// `NotFound` I/O errors become [`Error::NotFound`] so callers can skip
    /// missing files without inspecting the inner error kind.
    pub fn file_read(path: impl Into<String>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            return Error::NotFound(path);
        }
        Error::FileRead { path, source }
    }

    /// Whether this error ends a scan cleanly rather than failing it.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Error::EndOfFile | Error::Cancelled)
    }

    /// A copy with the same variant and message.
    ///
    /// Wrapped I/O and Arrow errors are rebuilt from their kind and text,
    /// since neither source type is `Clone`.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::EndOfFile => Error::EndOfFile,
            Error::NotFound(path) => Error::NotFound(path.clone()),
            Error::SchemaMismatch { column, message } => Error::SchemaMismatch {
                column: column.clone(),
                message: message.clone(),
            },
            Error::CorruptData(msg) => Error::CorruptData(msg.clone()),
            Error::Cancelled => Error::Cancelled,
            Error::FileRead { path, source } => Error::FileRead {
                path: path.clone(),
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
            Error::Arrow(err) => {
                Error::Arrow(arrow::error::ArrowError::ComputeError(err.to_string()))
            }
            Error::InvalidArgumentError(msg) => Error::InvalidArgumentError(msg.clone()),
            Error::Internal(msg) => Error::Internal(msg.clone()),
        }
    }
}
