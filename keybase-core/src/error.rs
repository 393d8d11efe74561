//! Error types for the keybase.

use std::fmt;
use thiserror::Error;

/// Count reported alongside a failed count operation
pub const INVALID_COUNT: i64 = -1;

/// Errors raised by an entry log or while waiting on it.
#[derive(Error, Debug)]
pub enum LogError {
    /// The storage could not be opened or initialised
    #[error("failed to open storage: {0}")]
    Open(#[source] sqlx::Error),

    /// A statement failed against the storage
    #[error("failed to execute statement: {0}")]
    Execution(#[source] sqlx::Error),

    /// The operation's cancel handle fired
    #[error("operation cancelled")]
    Cancelled,

    /// The operation's deadline passed
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// The storage answered with a shape the caller did not expect
    #[error("unexpected result shape: {0}")]
    Schema(String),

    /// The log was closed before this call
    #[error("storage is closed")]
    Closed,
}

/// Broad class of a [`KeybaseError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Open,
    Execution,
    Cancelled,
    DeadlineExceeded,
    SchemaViolation,
    Closed,
}

/// Public keybase operations, used to label errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Close,
    Put,
    MatchKey,
    CountKey,
    GetKeys,
    CountKeys,
    GetNamespaces,
    CountNamespaces,
    CountEntries,
    PruneEntries,
    ClearEntries,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Open => "Open",
            Operation::Close => "Close",
            Operation::Put => "Put",
            Operation::MatchKey => "MatchKey",
            Operation::CountKey => "CountKey",
            Operation::GetKeys => "GetKeys",
            Operation::CountKeys => "CountKeys",
            Operation::GetNamespaces => "GetNamespaces",
            Operation::CountNamespaces => "CountNamespaces",
            Operation::CountEntries => "CountEntries",
            Operation::PruneEntries => "PruneEntries",
            Operation::ClearEntries => "ClearEntries",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by every fallible keybase operation.
#[derive(Error, Debug)]
#[error("keybase.{operation}: {source}")]
pub struct KeybaseError {
    operation: Operation,
    #[source]
    source: LogError,
}

impl KeybaseError {
    pub(crate) fn new(operation: Operation, source: LogError) -> Self {
        Self { operation, source }
    }

    /// The operation that failed
    pub fn operation(&self) -> Operation {
        self.operation
    }

    /// The underlying log error
    pub fn log_error(&self) -> &LogError {
        &self.source
    }

    pub fn kind(&self) -> ErrorKind {
        match self.source {
            LogError::Open(_) => ErrorKind::Open,
            LogError::Execution(_) => ErrorKind::Execution,
            LogError::Cancelled => ErrorKind::Cancelled,
            LogError::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            LogError::Schema(_) => ErrorKind::SchemaViolation,
            LogError::Closed => ErrorKind::Closed,
        }
    }

    /// Returns `true` if the operation was cut short by cancellation or deadline.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind(), ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// Returns `true` if the storage answered with an unexpected shape.
    pub fn is_schema_violation(&self) -> bool {
        self.kind() == ErrorKind::SchemaViolation
    }
}

/// Flattens a count result into the integer form with [`INVALID_COUNT`] on failure.
pub trait CountResultExt {
    fn count_or_invalid(&self) -> i64;
}

impl CountResultExt for Result<u64, KeybaseError> {
    fn count_or_invalid(&self) -> i64 {
        match self {
            Ok(count) => i64::try_from(*count).unwrap_or(i64::MAX),
            Err(_) => INVALID_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_names_operation() {
        let err = KeybaseError::new(Operation::CountKey, LogError::Cancelled);
        assert_eq!(err.to_string(), "keybase.CountKey: operation cancelled");
        assert_eq!(err.operation(), Operation::CountKey);
    }

    #[test]
    fn test_kind_classification() {
        let cancelled = KeybaseError::new(Operation::Put, LogError::Cancelled);
        let deadline = KeybaseError::new(Operation::Put, LogError::DeadlineExceeded);
        let schema = KeybaseError::new(Operation::GetKeys, LogError::Schema("2 columns".into()));

        assert!(cancelled.is_cancelled());
        assert!(deadline.is_cancelled());
        assert_eq!(deadline.kind(), ErrorKind::DeadlineExceeded);
        assert!(schema.is_schema_violation());
        assert!(!schema.is_cancelled());

        let closed = KeybaseError::new(Operation::GetKeys, LogError::Closed);
        assert_eq!(closed.kind(), ErrorKind::Closed);
        assert_eq!(closed.to_string(), "keybase.GetKeys: storage is closed");
    }

    #[test]
    fn test_count_or_invalid() {
        let ok: Result<u64, KeybaseError> = Ok(3);
        let failed: Result<u64, KeybaseError> =
            Err(KeybaseError::new(Operation::CountKeys, LogError::DeadlineExceeded));

        assert_eq!(ok.count_or_invalid(), 3);
        assert_eq!(failed.count_or_invalid(), INVALID_COUNT);
    }
}
