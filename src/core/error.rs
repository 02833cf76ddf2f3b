/// sqlbase Error Module
///
/// This module defines the error types for the crate. Precondition
/// violations get their own variants so callers can match on them; errors
/// coming out of SQLite are passed through untouched.
use thiserror::Error;

/// Error type for every fallible operation in the crate.
///
/// The variants cover:
/// - Malformed connection descriptors and bad arguments
/// - Lifecycle violations (no connection, no transaction, transaction already open)
/// - Value coercion failures
/// - Driver errors from rusqlite, propagated unchanged
/// - Configuration loading
#[derive(Error, Debug)]
pub enum SqlBaseError {
    /// Errors raised by SQLite itself (syntax, constraints, I/O on the database file)
    #[error(transparent)]
    Database(#[from] rusqlite::Error),

    /// Empty or malformed descriptors, unknown column names
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// An execution or transaction operation was attempted with no open connection
    #[error("There are no opened connections")]
    NoOpenConnection,

    /// Commit or rollback was attempted with no active transaction
    #[error("There are no opened transactions")]
    NoOpenTransaction,

    /// A transaction was started while another one is still active
    #[error("A transaction is already active on this connection")]
    TransactionAlreadyActive,

    /// A raw value could not be coerced to the requested type
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Configuration loading and validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File system errors while reading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons a raw database value cannot be turned into the requested scalar.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("value {value} is out of range for {target}")]
    Overflow { value: String, target: &'static str },

    #[error("cannot parse {value:?} as {target}")]
    Parse { value: String, target: &'static str },

    #[error("cannot convert a {kind} value to {target}")]
    Unsupported {
        kind: &'static str,
        target: &'static str,
    },

    #[error("discriminant {discriminant} is not a variant of {target}")]
    UnknownVariant {
        discriminant: i32,
        target: &'static str,
    },
}

/// Type alias for Result with SqlBaseError as the error type.
pub type Result<T> = std::result::Result<T, SqlBaseError>;
