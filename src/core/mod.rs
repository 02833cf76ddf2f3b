/// Core Module for sqlbase
///
/// Connection lifecycle, execution primitives, value coercion, and the
/// shared error type.

pub mod coerce;
pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{ConversionError, Result, SqlBaseError};
