//! A small base layer for SQLite access.
//!
//! A [`ConnectionManager`] owns at most one open connection and at most one
//! transaction on it, and exposes three execution primitives: non-query
//! statements, row-returning queries read through a scoped cursor, and inserts
//! that return the generated row id. Values read back are converted with
//! [`coerce`], which maps NULL to the target type's default.
//!
//! Higher-level repositories depend on the [`DataAccessor`] trait rather than
//! on the manager directly.
//!
//! ```
//! use sqlbase::{ConnectionManager, DataAccessor};
//!
//! let mut db = ConnectionManager::new();
//! db.connect(":memory:")?;
//! db.execute_non_query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")?;
//!
//! db.begin_transaction()?;
//! let id = db.execute_insert_returning_id("INSERT INTO notes (body) VALUES ('hello')")?;
//! db.commit()?;
//!
//! let body: String = db.execute_scalar(&format!("SELECT body FROM notes WHERE id = {}", id))?;
//! assert_eq!(body, "hello");
//! # Ok::<(), sqlbase::SqlBaseError>(())
//! ```

// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod accessor;
pub mod config;

#[cfg(test)]
mod test_utils;

pub use crate::accessor::DataAccessor;
pub use crate::core::coerce::{coerce, Coerce};
pub use crate::core::db::{
    Command, ConnectionDescriptor, ConnectionManager, ConnectionOptions, OpenMode, Record,
    RowCursor, TransactionMode, TransactionState,
};
pub use crate::core::{ConversionError, Result, SqlBaseError};
pub use rusqlite::types::ValueRef;
