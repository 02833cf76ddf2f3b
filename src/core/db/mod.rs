/// Database Module
///
/// The database layer is split into three concerns:
/// - **Descriptors** (`descriptor.rs`): Parses connection strings into open flags and overrides
/// - **Connection Management** (`connection.rs`): Owns the connection and transaction lifecycle
/// - **Query Execution** (`query.rs`): Commands, row cursors, and records
///
/// ## Error Handling
///
/// All database operations return `SqlBaseError`; driver errors pass through
/// as `SqlBaseError::Database`.
pub mod connection;
pub mod descriptor;
pub mod query;

pub use connection::*;
pub use descriptor::*;
pub use query::*;
