/// Query Execution Module
///
/// This module provides the execution primitives: non-query statements,
/// row-returning statements read through a scoped cursor, and inserts that
/// report the generated row id. Each call builds a fresh `Command` bound to
/// the manager's open connection and active transaction.
use crate::core::coerce::{coerce, Coerce};
use crate::core::db::connection::{ConnectionManager, TransactionHandle};
use crate::core::{Result, SqlBaseError};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{Connection, Row, Rows};
use std::sync::Arc;
use tracing::trace;

/// Follow-up query run on the same connection after an insert
const LAST_INSERT_ID_SQL: &str = "SELECT last_insert_rowid() AS id";

/// A single statement bound to a connection and, optionally, a transaction.
///
/// Commands are built per call and never retained.
#[derive(Debug)]
pub struct Command<'c> {
    connection: &'c Connection,
    transaction: Option<&'c TransactionHandle>,
    text: &'c str,
}

impl<'c> Command<'c> {
    pub(crate) fn new(
        connection: &'c Connection,
        transaction: Option<&'c TransactionHandle>,
        text: &'c str,
    ) -> Self {
        Command {
            connection,
            transaction,
            text,
        }
    }

    pub fn text(&self) -> &str {
        self.text
    }

    /// `true` when the statement runs outside an explicit transaction
    pub fn is_autocommit(&self) -> bool {
        self.transaction.is_none()
    }

    fn trace(&self, operation: &str) {
        trace!(
            operation,
            autocommit = self.is_autocommit(),
            sql = self.text,
            "executing command"
        );
    }

    /// Runs the statement text, which may hold several `;`-separated statements.
    pub fn execute_non_query(&self) -> Result<()> {
        self.trace("non_query");
        self.connection.execute_batch(self.text)?;
        Ok(())
    }

    /// Runs a row-returning statement and hands a cursor over its rows to `read`.
    pub fn execute_reader<T, F>(&self, read: F) -> Result<T>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>,
    {
        self.trace("reader");
        let mut stmt = self.connection.prepare(self.text)?;
        let columns: Arc<[String]> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt.query([])?;
        let mut cursor = RowCursor::new(rows, columns);
        read(&mut cursor)
    }

    /// Runs an insert, then reads back the id it generated on this connection.
    ///
    /// The session's last rowid is cleared first, so a statement that adds no
    /// rowid (an empty insert, an insert into a `WITHOUT ROWID` table, an
    /// update or a delete) reports 0 instead of an id from an earlier insert.
    pub fn execute_insert_returning_id(&self) -> Result<i64> {
        self.trace("insert_returning_id");
        // SAFETY: the handle belongs to a live connection that this command
        // borrows, and `Connection` is not `Sync`, so no other thread uses it.
        unsafe {
            rusqlite::ffi::sqlite3_set_last_insert_rowid(self.connection.handle(), 0);
        }
        self.connection.execute_batch(self.text)?;

        Command::new(self.connection, self.transaction, LAST_INSERT_ID_SQL).execute_reader(
            |cursor| {
                let mut id = 0;
                for record in cursor {
                    id = record?.get::<i64>("id")?;
                }
                Ok(id)
            },
        )
    }
}

/// A forward-only cursor over the rows of one statement.
///
/// Rows are fetched from SQLite one at a time as the cursor advances. The
/// cursor only lives for the duration of the `execute_reader` callback, so
/// it is always released before the connection runs another statement.
pub struct RowCursor<'stmt> {
    rows: Rows<'stmt>,
    columns: Arc<[String]>,
    done: bool,
}

impl<'stmt> RowCursor<'stmt> {
    fn new(rows: Rows<'stmt>, columns: Arc<[String]>) -> Self {
        RowCursor {
            rows,
            columns,
            done: false,
        }
    }

    /// Column names of the result set, in order
    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Iterator for RowCursor<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.rows.next() {
            Ok(Some(row)) => Some(Record::from_row(row, &self.columns)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// One row read from a cursor, with access by column name or position.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Record {
    fn from_row(row: &Row<'_>, columns: &Arc<[String]>) -> Result<Self> {
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(Value::from))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(Record {
            columns: Arc::clone(columns),
            values,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Position of a column; names are matched case-insensitively.
    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c == column)
            .or_else(|| self.columns.iter().position(|c| c.eq_ignore_ascii_case(column)))
    }

    /// Raw value of a column
    pub fn raw(&self, column: &str) -> Result<ValueRef<'_>> {
        let index = self.index_of(column).ok_or_else(|| {
            SqlBaseError::InvalidArgument(format!("No column named '{}' in result set", column))
        })?;
        Ok(ValueRef::from(&self.values[index]))
    }

    /// Coerces a column to `T`; NULL yields `T::default()`.
    pub fn get<T: Coerce>(&self, column: &str) -> Result<T> {
        Ok(coerce(self.raw(column)?)?)
    }

    /// Coerces the column at `index` to `T`.
    pub fn get_at<T: Coerce>(&self, index: usize) -> Result<T> {
        let value = self.values.get(index).ok_or_else(|| {
            SqlBaseError::InvalidArgument(format!(
                "Column index {} out of range for {} columns",
                index,
                self.values.len()
            ))
        })?;
        Ok(coerce(ValueRef::from(value))?)
    }

    pub fn is_null(&self, column: &str) -> Result<bool> {
        Ok(matches!(self.raw(column)?, ValueRef::Null))
    }
}

impl ConnectionManager {
    /// Builds a command for `sql` on the open connection and active transaction.
    ///
    /// # Errors
    ///
    /// Returns `SqlBaseError::NoOpenConnection` if no connection is open.
    pub fn command<'c>(&'c self, sql: &'c str) -> Result<Command<'c>> {
        let open = self.open_connection()?;
        Ok(Command::new(&open.handle, self.transaction.as_ref(), sql))
    }

    /// Executes a statement that returns no rows (DDL or DML).
    pub fn execute_non_query(&mut self, sql: &str) -> Result<()> {
        let result = self.command(sql)?.execute_non_query();
        self.sync_transaction_state();
        result
    }

    /// Executes a query and passes a cursor over its rows to `read`.
    ///
    /// # Examples
    ///
    /// ```
    /// let mut manager = sqlbase::ConnectionManager::new();
    /// manager.connect(":memory:")?;
    /// let names = manager.execute_reader("SELECT 'a' AS name UNION ALL SELECT 'b'", |rows| {
    ///     rows.map(|row| row?.get::<String>("name")).collect::<sqlbase::Result<Vec<_>>>()
    /// })?;
    /// assert_eq!(names, vec!["a", "b"]);
    /// # Ok::<(), sqlbase::SqlBaseError>(())
    /// ```
    pub fn execute_reader<T, F>(&mut self, sql: &str, read: F) -> Result<T>
    where
        F: FnOnce(&mut RowCursor<'_>) -> Result<T>,
    {
        let result = self.command(sql)?.execute_reader(read);
        self.sync_transaction_state();
        result
    }

    /// Executes an insert and returns the row id it generated, or 0 if it
    /// inserted nothing.
    pub fn execute_insert_returning_id(&mut self, sql: &str) -> Result<i64> {
        let result = self.command(sql)?.execute_insert_returning_id();
        self.sync_transaction_state();
        result
    }

    /// Reads the first column of the first row, or `T::default()` if the
    /// query returns no rows.
    pub fn execute_scalar<T: Coerce>(&mut self, sql: &str) -> Result<T> {
        self.execute_reader(sql, |cursor| match cursor.next() {
            Some(record) => record?.get_at(0),
            None => Ok(T::default()),
        })
    }
}
