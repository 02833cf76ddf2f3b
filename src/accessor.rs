//! Data access capability for repositories.
//!
//! Repositories hold something that implements [`DataAccessor`] instead of
//! extending a base type. `ConnectionManager` is the production
//! implementation; tests can substitute their own.
use crate::core::coerce::Coerce;
use crate::core::db::{ConnectionManager, RowCursor};
use crate::core::Result;
use tracing::warn;

/// Execution and transaction operations over one logical connection.
pub trait DataAccessor {
    fn begin_transaction(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Executes a statement that returns no rows.
    fn execute_non_query(&mut self, sql: &str) -> Result<()>;

    /// Executes a query and hands a row cursor to `read`.
    fn execute_reader<T, F>(&mut self, sql: &str, read: F) -> Result<T>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>;

    /// Executes an insert and returns the generated id, or 0 if nothing was inserted.
    fn execute_insert_returning_id(&mut self, sql: &str) -> Result<i64>;

    /// First column of the first row, or `T::default()` when there are no rows.
    fn execute_scalar<T: Coerce>(&mut self, sql: &str) -> Result<T> {
        self.execute_reader(sql, |cursor| match cursor.next() {
            Some(record) => record?.get_at(0),
            None => Ok(T::default()),
        })
    }

    /// Runs `work` inside a transaction, committing on success and rolling
    /// back on error. The original error is returned even if the rollback
    /// itself fails.
    fn transaction<T, F>(&mut self, work: F) -> Result<T>
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> Result<T>,
    {
        self.begin_transaction()?;
        match work(self) {
            Ok(value) => {
                self.commit()?;
                Ok(value)
            }
            Err(err) => {
                if self.in_transaction() {
                    if let Err(rollback_err) = self.rollback() {
                        warn!("Rollback after failed unit of work also failed: {}", rollback_err);
                    }
                }
                Err(err)
            }
        }
    }
}

impl DataAccessor for ConnectionManager {
    fn begin_transaction(&mut self) -> Result<()> {
        ConnectionManager::begin_transaction(self)
    }

    fn commit(&mut self) -> Result<()> {
        ConnectionManager::commit(self)
    }

    fn rollback(&mut self) -> Result<()> {
        ConnectionManager::rollback(self)
    }

    fn in_transaction(&self) -> bool {
        ConnectionManager::in_transaction(self)
    }

    fn execute_non_query(&mut self, sql: &str) -> Result<()> {
        ConnectionManager::execute_non_query(self, sql)
    }

    fn execute_reader<T, F>(&mut self, sql: &str, read: F) -> Result<T>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>,
    {
        ConnectionManager::execute_reader(self, sql, read)
    }

    fn execute_insert_returning_id(&mut self, sql: &str) -> Result<i64> {
        ConnectionManager::execute_insert_returning_id(self, sql)
    }

    fn execute_scalar<T: Coerce>(&mut self, sql: &str) -> Result<T> {
        ConnectionManager::execute_scalar(self, sql)
    }
}
