/// Connection Management Module
///
/// This module owns the connection and transaction lifecycle: at most one
/// open SQLite connection per manager, and at most one transaction bound to
/// it. Every other operation in the crate goes through the checks here.
use crate::config::Config;
use crate::core::db::descriptor::ConnectionDescriptor;
use crate::core::{Result, SqlBaseError};
use rusqlite::Connection;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Journal modes accepted for `PRAGMA journal_mode`
pub(crate) const JOURNAL_MODES: &[&str] = &["DELETE", "TRUNCATE", "PERSIST", "MEMORY", "WAL", "OFF"];

/// Checks `mode` against [`JOURNAL_MODES`], ignoring case, and returns it in
/// upper case.
pub(crate) fn check_journal_mode(mode: &str) -> Result<String> {
    let upper = mode.trim().to_ascii_uppercase();
    if JOURNAL_MODES.contains(&upper.as_str()) {
        Ok(upper)
    } else {
        Err(SqlBaseError::Config(format!(
            "unsupported journal_mode '{}'",
            mode
        )))
    }
}

/// How `BEGIN` acquires locks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    /// Locks are taken on first read or write
    #[default]
    Deferred,
    /// A write lock is taken immediately
    Immediate,
    /// An exclusive lock is taken immediately
    Exclusive,
}

impl TransactionMode {
    fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED",
            TransactionMode::Immediate => "BEGIN IMMEDIATE",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE",
        }
    }
}

/// Represents database transaction states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// No active transaction (autocommit mode)
    #[default]
    Autocommit,
    /// A transaction started by `begin_transaction` is in progress
    Active,
}

/// Settings applied to every connection the manager opens.
///
/// Values given in the connection descriptor take precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionOptions {
    pub foreign_keys: bool,
    pub busy_timeout: Option<Duration>,
    /// Skipped for in-memory databases
    pub journal_mode: Option<String>,
    pub transaction_mode: TransactionMode,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        ConnectionOptions {
            foreign_keys: true,
            busy_timeout: None,
            journal_mode: None,
            transaction_mode: TransactionMode::default(),
        }
    }
}

/// The transaction currently bound to the open connection.
#[derive(Debug)]
pub(crate) struct TransactionHandle {
    pub(crate) mode: TransactionMode,
}

/// An open connection together with the descriptor it was opened from.
#[derive(Debug)]
pub(crate) struct OpenConnection {
    pub(crate) handle: Connection,
    pub(crate) descriptor: ConnectionDescriptor,
}

/// Owner of one database connection and its optional transaction.
///
/// A manager is meant to be held by a single owner; state transitions take
/// `&mut self` and no locking is done internally. Dropping the manager closes
/// its connection, which discards any uncommitted transaction.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    pub(crate) connection: Option<OpenConnection>,
    pub(crate) transaction: Option<TransactionHandle>,
    options: ConnectionOptions,
}

impl ConnectionManager {
    /// Creates a manager with default options and no connection
    pub fn new() -> Self {
        ConnectionManager::default()
    }

    /// Creates a manager that applies `options` to every connection it opens
    pub fn with_options(options: ConnectionOptions) -> Self {
        ConnectionManager {
            connection: None,
            transaction: None,
            options,
        }
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Opens a new connection, closing the current one first.
    ///
    /// # Arguments
    ///
    /// * `descriptor` - A database path, `:memory:`, a `file:` URI, or a
    ///   `key=value;` connection string
    ///
    /// # Errors
    ///
    /// `SqlBaseError::InvalidArgument` if the descriptor is empty or
    /// malformed; in that case the current connection is left untouched.
    /// Failures to close the old connection or open the new one are returned
    /// as `SqlBaseError::Database`.
    ///
    /// # Examples
    ///
    /// ```
    /// let mut manager = sqlbase::ConnectionManager::new();
    /// manager.connect(":memory:")?;
    /// assert!(manager.is_open());
    /// # Ok::<(), sqlbase::SqlBaseError>(())
    /// ```
    pub fn connect(&mut self, descriptor: &str) -> Result<()> {
        let descriptor = ConnectionDescriptor::parse(descriptor)?;
        self.open(descriptor)
    }

    /// Adopts the options from `config` and connects to its descriptor.
    ///
    /// The options are only replaced if the connection is opened; on any
    /// error the manager keeps the options it had before.
    pub fn connect_with_config(&mut self, config: &Config) -> Result<()> {
        let descriptor = ConnectionDescriptor::parse(&config.database.descriptor)?;
        let previous = std::mem::replace(&mut self.options, config.connection_options());
        let result = self.open(descriptor);
        if result.is_err() {
            self.options = previous;
        }
        result
    }

    fn open(&mut self, descriptor: ConnectionDescriptor) -> Result<()> {
        // Bad options must not cost the caller the current connection
        let journal_mode = self
            .options
            .journal_mode
            .as_deref()
            .map(check_journal_mode)
            .transpose()?;

        self.disconnect()?;

        let handle = Connection::open_with_flags(&descriptor.data_source, descriptor.open_flags())?;
        self.configure(&handle, &descriptor, journal_mode.as_deref())?;

        debug!("Opened connection to {}", descriptor);
        self.connection = Some(OpenConnection { handle, descriptor });
        Ok(())
    }

    fn configure(
        &self,
        handle: &Connection,
        descriptor: &ConnectionDescriptor,
        journal_mode: Option<&str>,
    ) -> Result<()> {
        let foreign_keys = descriptor.foreign_keys.unwrap_or(self.options.foreign_keys);
        handle.execute_batch(if foreign_keys {
            "PRAGMA foreign_keys = ON;"
        } else {
            "PRAGMA foreign_keys = OFF;"
        })?;

        if let Some(timeout) = descriptor.busy_timeout.or(self.options.busy_timeout) {
            handle.busy_timeout(timeout)?;
        }

        if let Some(mode) = journal_mode {
            if !descriptor.is_memory() {
                handle.execute_batch(&format!("PRAGMA journal_mode = {};", mode))?;
            }
        }

        Ok(())
    }

    /// Closes the current connection, if any.
    ///
    /// A transaction still active at this point is discarded along with the
    /// connection. Calling this with no open connection is a no-op.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(open) = self.connection.take() else {
            return Ok(());
        };
        let transaction = self.transaction.take();
        if transaction.is_some() {
            warn!(
                "Closing {} with an active transaction; uncommitted work is discarded",
                open.descriptor
            );
        }

        let OpenConnection { handle, descriptor } = open;
        match handle.close() {
            Ok(()) => {
                debug!("Closed connection to {}", descriptor);
                Ok(())
            }
            Err((handle, err)) => {
                self.connection = Some(OpenConnection { handle, descriptor });
                self.transaction = transaction;
                Err(err.into())
            }
        }
    }

    /// Checks if there's an open connection
    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    /// Checks if a transaction started by `begin_transaction` is in progress
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction_state(&self) -> TransactionState {
        if self.in_transaction() {
            TransactionState::Active
        } else {
            TransactionState::Autocommit
        }
    }

    /// Descriptor of the open connection, if any
    pub fn descriptor(&self) -> Option<&ConnectionDescriptor> {
        self.connection.as_ref().map(|open| &open.descriptor)
    }

    pub(crate) fn open_connection(&self) -> Result<&OpenConnection> {
        self.connection.as_ref().ok_or(SqlBaseError::NoOpenConnection)
    }

    /// Starts a transaction on the open connection.
    ///
    /// # Errors
    ///
    /// `SqlBaseError::NoOpenConnection` without a connection,
    /// `SqlBaseError::TransactionAlreadyActive` if one was already started.
    pub fn begin_transaction(&mut self) -> Result<()> {
        let open = self.open_connection()?;
        if self.transaction.is_some() {
            return Err(SqlBaseError::TransactionAlreadyActive);
        }

        let mode = self.options.transaction_mode;
        open.handle.execute_batch(mode.begin_sql())?;
        debug!("Began {:?} transaction on {}", mode, open.descriptor);

        self.transaction = Some(TransactionHandle { mode });
        Ok(())
    }

    /// Commits the active transaction.
    ///
    /// # Errors
    ///
    /// `SqlBaseError::NoOpenConnection` is checked before
    /// `SqlBaseError::NoOpenTransaction`.
    pub fn commit(&mut self) -> Result<()> {
        self.finish_transaction("COMMIT")
    }

    /// Rolls back the active transaction, with the same checks as `commit`.
    pub fn rollback(&mut self) -> Result<()> {
        self.finish_transaction("ROLLBACK")
    }

    fn finish_transaction(&mut self, sql: &'static str) -> Result<()> {
        let open = self
            .connection
            .as_ref()
            .ok_or(SqlBaseError::NoOpenConnection)?;
        let mode = match &self.transaction {
            Some(transaction) => transaction.mode,
            None => return Err(SqlBaseError::NoOpenTransaction),
        };

        let result = open.handle.execute_batch(sql);
        // A failed COMMIT (e.g. SQLITE_BUSY) leaves the transaction open.
        if result.is_ok() || open.handle.is_autocommit() {
            self.transaction = None;
        }
        result?;

        debug!("{} of {:?} transaction on {}", sql, mode, open.descriptor);
        Ok(())
    }

    /// Drops the transaction handle if SQLite has already ended the
    /// transaction, e.g. after a raw `COMMIT` or a constraint-triggered
    /// rollback.
    pub(crate) fn sync_transaction_state(&mut self) {
        let ended = match (&self.connection, &self.transaction) {
            (Some(open), Some(_)) => open.handle.is_autocommit(),
            _ => false,
        };
        if ended {
            debug!("Transaction ended outside commit/rollback");
            self.transaction = None;
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Err(e) = self.disconnect() {
            warn!("Failed to close connection on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn table_exists(manager: &ConnectionManager, name: &str) -> bool {
        let open = manager.open_connection().unwrap();
        open.handle
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .unwrap()
            == 1
    }

    #[test]
    fn test_connection_manager_initialization() {
        let mut manager = ConnectionManager::new();
        assert!(!manager.is_open());
        assert!(manager.descriptor().is_none());

        manager.connect(":memory:").unwrap();
        assert!(manager.is_open());
        assert_eq!(manager.transaction_state(), TransactionState::Autocommit);
        assert_eq!(manager.descriptor().unwrap().data_source, ":memory:");
    }

    #[test]
    fn test_connection_disconnect() {
        let mut manager = ConnectionManager::new();
        manager.connect(":memory:").unwrap();
        assert!(manager.is_open());

        manager.disconnect().unwrap();
        assert!(!manager.is_open());

        // A second disconnect is a no-op
        manager.disconnect().unwrap();
        assert!(!manager.is_open());
    }

    #[test]
    fn test_empty_descriptor_keeps_connection() {
        let mut manager = ConnectionManager::new();
        manager.connect(":memory:").unwrap();
        manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("CREATE TABLE kept (id INTEGER)")
            .unwrap();

        for descriptor in ["", "   "] {
            match manager.connect(descriptor) {
                Err(SqlBaseError::InvalidArgument(_)) => {}
                other => panic!("Expected InvalidArgument, got {:?}", other),
            }
        }

        assert!(manager.is_open());
        assert!(table_exists(&manager, "kept"));
    }

    #[test]
    fn test_reconnect_replaces_connection() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first.db");
        let second = dir.path().join("second.db");

        let mut manager = ConnectionManager::new();
        manager.connect(first.to_str().unwrap()).unwrap();
        manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("CREATE TABLE only_in_first (id INTEGER)")
            .unwrap();

        manager.connect(second.to_str().unwrap()).unwrap();
        assert!(manager.is_open());
        assert_eq!(
            manager.descriptor().unwrap().data_source,
            second.to_str().unwrap()
        );
        assert!(!table_exists(&manager, "only_in_first"));
    }

    #[test]
    fn test_connection_error_handling() {
        let mut manager = ConnectionManager::new();
        let result = manager.connect("/nonexistent/path/database.db");
        match result {
            Err(SqlBaseError::Database(_)) => {}
            other => panic!("Expected Database error, got {:?}", other),
        }
        assert!(!manager.is_open());

        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.db");
        let result = manager.connect(&format!(
            "Data Source={};Mode=ReadWrite",
            missing.display()
        ));
        assert!(matches!(result, Err(SqlBaseError::Database(_))));
    }

    #[test]
    fn test_transaction_requires_connection() {
        let mut manager = ConnectionManager::new();
        assert!(matches!(
            manager.begin_transaction(),
            Err(SqlBaseError::NoOpenConnection)
        ));
        assert!(matches!(manager.commit(), Err(SqlBaseError::NoOpenConnection)));
        assert!(matches!(manager.rollback(), Err(SqlBaseError::NoOpenConnection)));
    }

    #[test]
    fn test_transaction_state_management() {
        let mut manager = ConnectionManager::new();
        manager.connect(":memory:").unwrap();

        assert!(matches!(manager.commit(), Err(SqlBaseError::NoOpenTransaction)));
        assert!(matches!(manager.rollback(), Err(SqlBaseError::NoOpenTransaction)));

        manager.begin_transaction().unwrap();
        assert!(manager.is_open());
        assert_eq!(manager.transaction_state(), TransactionState::Active);

        assert!(matches!(
            manager.begin_transaction(),
            Err(SqlBaseError::TransactionAlreadyActive)
        ));
        assert!(manager.in_transaction());

        manager.commit().unwrap();
        assert_eq!(manager.transaction_state(), TransactionState::Autocommit);
        assert!(matches!(manager.commit(), Err(SqlBaseError::NoOpenTransaction)));

        manager.begin_transaction().unwrap();
        manager.rollback().unwrap();
        assert!(!manager.in_transaction());
        assert!(matches!(manager.rollback(), Err(SqlBaseError::NoOpenTransaction)));
    }

    #[test]
    fn test_disconnect_discards_transaction() {
        let mut manager = ConnectionManager::new();
        manager.connect(":memory:").unwrap();
        manager.begin_transaction().unwrap();

        manager.disconnect().unwrap();
        assert!(!manager.in_transaction());

        manager.connect(":memory:").unwrap();
        assert!(!manager.in_transaction());
        manager.begin_transaction().unwrap();
    }

    #[test]
    fn test_transaction_mode_from_options() {
        let mut manager = ConnectionManager::with_options(ConnectionOptions {
            transaction_mode: TransactionMode::Immediate,
            ..ConnectionOptions::default()
        });
        manager.connect(":memory:").unwrap();
        manager.begin_transaction().unwrap();
        assert_eq!(
            manager.transaction.as_ref().unwrap().mode,
            TransactionMode::Immediate
        );
        manager.commit().unwrap();
    }

    #[test]
    fn test_connection_pragmas() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pragmas.db");

        let mut manager = ConnectionManager::with_options(ConnectionOptions {
            journal_mode: Some("WAL".to_string()),
            ..ConnectionOptions::default()
        });
        manager.connect(path.to_str().unwrap()).unwrap();

        let handle = &manager.open_connection().unwrap().handle;
        let foreign_keys: i64 = handle
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
        let journal: String = handle
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal.to_ascii_uppercase(), "WAL");

        // Descriptor settings override the manager's options
        manager
            .connect(&format!("Data Source={};Foreign Keys=false", path.display()))
            .unwrap();
        let foreign_keys: i64 = manager
            .open_connection()
            .unwrap()
            .handle
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 0);
    }

    #[test]
    fn test_invalid_journal_mode_option() {
        for mode in ["WAL; DROP TABLE x", "bogus", "wall"] {
            let mut manager = ConnectionManager::with_options(ConnectionOptions {
                journal_mode: Some(mode.to_string()),
                ..ConnectionOptions::default()
            });
            assert!(
                matches!(manager.connect(":memory:"), Err(SqlBaseError::Config(_))),
                "journal mode '{}' should be rejected",
                mode
            );
            assert!(!manager.is_open());
        }
    }

    #[test]
    fn test_journal_mode_option_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("journal.db");
        let mut manager = ConnectionManager::with_options(ConnectionOptions {
            journal_mode: Some("truncate".to_string()),
            ..ConnectionOptions::default()
        });
        manager.connect(path.to_str().unwrap()).unwrap();
        let journal: String = manager
            .open_connection()
            .unwrap()
            .handle
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(journal.to_ascii_uppercase(), "TRUNCATE");
    }

    #[test]
    fn test_invalid_journal_mode_keeps_connection() {
        let mut manager = ConnectionManager::new();
        manager.connect(":memory:").unwrap();
        manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("CREATE TABLE kept (id INTEGER)")
            .unwrap();

        manager.options.journal_mode = Some("bogus".to_string());
        assert!(matches!(
            manager.connect(":memory:"),
            Err(SqlBaseError::Config(_))
        ));
        assert!(table_exists(&manager, "kept"));
    }

    #[test]
    fn test_memory_mode_creates_no_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scratch");

        let mut manager = ConnectionManager::new();
        manager
            .connect(&format!("Data Source={};Mode=Memory", path.display()))
            .unwrap();
        manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('x');")
            .unwrap();
        assert!(table_exists(&manager, "notes"));
        assert!(manager.descriptor().unwrap().is_memory());
        assert!(!path.exists());

        manager.disconnect().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_read_only_uri_descriptor() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readonly.db");

        let mut manager = ConnectionManager::new();
        manager.connect(path.to_str().unwrap()).unwrap();
        manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("CREATE TABLE notes (body TEXT); INSERT INTO notes VALUES ('kept');")
            .unwrap();

        manager
            .connect(&format!("Data Source=file:{};Mode=ReadOnly", path.display()))
            .unwrap();
        let handle = &manager.open_connection().unwrap().handle;
        let body: String = handle
            .query_row("SELECT body FROM notes", [], |row| row.get(0))
            .unwrap();
        assert_eq!(body, "kept");
        assert!(handle.execute_batch("INSERT INTO notes VALUES ('new')").is_err());

        // A URI query parameter under the Filename alias also opens read-only
        manager
            .connect(&format!("Filename=file:{}?mode=ro", path.display()))
            .unwrap();
        assert!(manager
            .open_connection()
            .unwrap()
            .handle
            .execute_batch("DELETE FROM notes")
            .is_err());
    }

    #[test]
    fn test_connect_with_config() {
        let config = Config::from_toml_str(
            "[database]\ndescriptor = \":memory:\"\ntransaction_behavior = \"exclusive\"\n",
        )
        .unwrap();
        let mut manager = ConnectionManager::new();
        manager.connect_with_config(&config).unwrap();
        assert!(manager.is_open());
        assert_eq!(manager.options().transaction_mode, TransactionMode::Exclusive);
    }

    #[test]
    fn test_connect_with_bad_config_keeps_options() {
        let mut manager = ConnectionManager::with_options(ConnectionOptions {
            busy_timeout: Some(Duration::from_millis(75)),
            ..ConnectionOptions::default()
        });
        manager.connect(":memory:").unwrap();
        let before = manager.options().clone();

        let config = Config::from_toml_str(
            "[database]\ndescriptor = \"Data Source=a.db;Colour=blue\"\ntransaction_behavior = \"immediate\"\nforeign_keys = false\n",
        )
        .unwrap();
        assert!(matches!(
            manager.connect_with_config(&config),
            Err(SqlBaseError::InvalidArgument(_))
        ));
        assert_eq!(manager.options(), &before);
        assert!(manager.is_open());

        // A descriptor that parses but cannot be opened also leaves options alone
        let config = Config::from_toml_str(
            "[database]\ndescriptor = \"/nonexistent/path/database.db\"\ntransaction_behavior = \"immediate\"\n",
        )
        .unwrap();
        assert!(matches!(
            manager.connect_with_config(&config),
            Err(SqlBaseError::Database(_))
        ));
        assert_eq!(manager.options(), &before);
    }
}
