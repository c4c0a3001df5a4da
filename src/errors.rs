/*!
This module contains error types specific to Squall as well as wrappers and `From` implementations
for common errors to enable error propagation.
*/

use std::fmt;
use std::io;
use std::num::TryFromIntError;

pub type SquallResult<T> = Result<T, SquallError>;

/**
Top-level database errors.

The variants form a closed set of status kinds. Every public entry point reports failures through
one of these kinds with a free-form primary message and, where useful, a secondary message folded
into it.
*/
#[derive(Clone, Debug)]
pub enum SquallError {
    /// Variant for entities (files, keys, column families) that could not be found.
    NotFound(String),

    /// Variant for malformed data detected on the file system.
    Corruption(String),

    /// Variant for operations or file formats this build cannot handle.
    NotSupported(String),

    /// Variant for invalid user-supplied options or arguments.
    InvalidArgument(String),

    /// Variant for errors stemming from I/O operations.
    IO(DBIOError),

    /// Variant for operations that were aborted part way through.
    Aborted(String),

    /// Variant for resources that are temporarily held by another actor e.g. the database lock.
    Busy(String),
}

impl std::error::Error for SquallError {}

impl fmt::Display for SquallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SquallError::NotFound(msg) => write!(f, "NotFound: {msg}"),
            SquallError::Corruption(msg) => write!(f, "Corruption: {msg}"),
            SquallError::NotSupported(msg) => write!(f, "Not supported: {msg}"),
            SquallError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            SquallError::IO(base_err) => write!(f, "IO error: {base_err}"),
            SquallError::Aborted(msg) => write!(f, "Aborted: {msg}"),
            SquallError::Busy(msg) => write!(f, "Busy: {msg}"),
        }
    }
}

impl From<io::Error> for SquallError {
    fn from(err: io::Error) -> Self {
        SquallError::IO(err.into())
    }
}

impl From<DBIOError> for SquallError {
    fn from(err: DBIOError) -> Self {
        SquallError::IO(err)
    }
}

impl From<LogIOError> for SquallError {
    fn from(err: LogIOError) -> Self {
        match err {
            LogIOError::IO(io_err) => SquallError::IO(io_err),
            LogIOError::Corruption(metadata) => SquallError::Corruption(format!(
                "{reason} ({num_bytes} bytes dropped)",
                reason = metadata.reason,
                num_bytes = metadata.bytes_corrupted
            )),
            LogIOError::Truncation(msg) => SquallError::Corruption(msg),
            LogIOError::Seralization(kind) => SquallError::Corruption(format!("{kind:?}")),
        }
    }
}

impl SquallError {
    /// Returns true if this is a [`SquallError::NotFound`] status.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SquallError::NotFound(_))
    }

    /// Returns true if this is a [`SquallError::Corruption`] status.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SquallError::Corruption(_))
    }

    /// Returns true if this is a [`SquallError::NotSupported`] status.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, SquallError::NotSupported(_))
    }

    /// Returns true if this is a [`SquallError::InvalidArgument`] status.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, SquallError::InvalidArgument(_))
    }
}

/**
A cloneable wrapper for [`io::Error`].

Squall errors are stored in shared database state so they must be cloneable. [`io::Error`] does
not implement [`Clone`], so the error kind and the formatted message are kept instead.
*/
#[derive(Clone, Debug)]
pub struct DBIOError {
    kind: io::ErrorKind,
    message: String,
}

impl DBIOError {
    /// Create a new instance of [`DBIOError`].
    pub fn new(kind: io::ErrorKind, message: String) -> Self {
        Self { kind, message }
    }

    /// The kind of the underlying I/O error.
    pub fn kind(&self) -> io::ErrorKind {
        self.kind
    }
}

impl std::error::Error for DBIOError {}

impl fmt::Display for DBIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<io::Error> for DBIOError {
    fn from(err: io::Error) -> Self {
        DBIOError::new(err.kind(), err.to_string())
    }
}

/// Alias for a [`Result`] that wraps a [`LogIOError`].
pub type LogIOResult<T> = Result<T, LogIOError>;

/// Metadata describing corruption detected in a framed log file.
#[derive(Clone, Debug)]
pub struct LogCorruptionErrorMetadata {
    /// The number of bytes that were dropped because of the corruption.
    pub(crate) bytes_corrupted: u64,

    /// A human-readable reason for the corruption classification.
    pub(crate) reason: String,
}

/**
Errors related to reading and writing framed log files (write-ahead logs and manifest files).

Recovery policy decisions depend on distinguishing a record that is *corrupt* (the bytes are there
but fail verification) from a record that is *truncated* (the file ends before the record does),
so those are separate variants here rather than being folded into one another.
*/
#[derive(Clone, Debug)]
pub enum LogIOError {
    /// Variant for errors that are related to I/O.
    IO(DBIOError),

    /// Variant for records whose bytes are present but fail checksum or framing verification.
    Corruption(LogCorruptionErrorMetadata),

    /// Variant for files that end in the middle of a record.
    Truncation(String),

    /**
    Variant for parsing issues that arise specifically from serializing data to or deserializing
    data from the file system.
    */
    Seralization(LogSerializationErrorKind),
}

/**
Different kinds of errors that can arise from serialization and deserialization activities on
framed log files.
*/
#[derive(Clone, Debug)]
pub enum LogSerializationErrorKind {
    FromInt(String),
    Other(String),
}

impl std::error::Error for LogIOError {}

impl fmt::Display for LogIOError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogIOError::IO(base_err) => write!(f, "{base_err}"),
            LogIOError::Corruption(err_metadata) => write!(f, "{err_metadata:?}"),
            LogIOError::Truncation(msg) => write!(f, "{msg}"),
            LogIOError::Seralization(err_metadata) => write!(f, "{err_metadata:?}"),
        }
    }
}

impl From<io::Error> for LogIOError {
    fn from(err: io::Error) -> Self {
        LogIOError::IO(err.into())
    }
}

impl From<TryFromIntError> for LogIOError {
    fn from(err: TryFromIntError) -> Self {
        LogIOError::Seralization(LogSerializationErrorKind::FromInt(err.to_string()))
    }
}
