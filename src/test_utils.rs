/// # Test Utilities Module
///
/// Shared fixtures for the crate's unit and integration tests:
/// - File-backed test databases that survive reconnects
/// - A seeded schema with AUTOINCREMENT keys
/// - Assertion macros for `SqlBaseError` variants
/// - One-time tracing setup
use crate::core::db::ConnectionManager;
use crate::core::Result;
use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;

static TRACING: Once = Once::new();

/// Installs a test-writer tracing subscriber once per test binary
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::TRACE)
            .try_init();
    });
}

/// A database file in its own temporary directory, removed on drop
pub struct DatabaseFixture {
    pub name: String,
    dir: TempDir,
}

impl DatabaseFixture {
    /// Create an empty file database
    pub fn new(name: &str) -> Result<Self> {
        init_tracing();
        let dir = TempDir::new()?;
        Ok(DatabaseFixture {
            name: name.to_string(),
            dir,
        })
    }

    /// Create a database with the standard schema already in place
    pub fn with_schema(name: &str) -> Result<Self> {
        let fixture = Self::new(name)?;
        let mut manager = fixture.connect()?;
        manager.execute_non_query(STANDARD_SCHEMA)?;
        manager.disconnect()?;
        Ok(fixture)
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().join(format!("{}.db", self.name))
    }

    pub fn descriptor(&self) -> String {
        self.path().display().to_string()
    }

    /// Opens a fresh manager on this database
    pub fn connect(&self) -> Result<ConnectionManager> {
        let mut manager = ConnectionManager::new();
        manager.connect(&self.descriptor())?;
        Ok(manager)
    }
}

pub const STANDARD_SCHEMA: &str = "
    CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        active BOOLEAN DEFAULT TRUE
    );

    CREATE TABLE posts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL,
        title TEXT NOT NULL,
        status INTEGER NOT NULL DEFAULT 0,
        FOREIGN KEY (user_id) REFERENCES users (id) ON DELETE CASCADE
    );
";

/// Asserts that a result is an error matching the given `SqlBaseError` pattern
#[macro_export]
macro_rules! assert_sqlbase_error {
    ($result:expr, $variant:pat, $context:expr) => {
        match $result {
            Err($variant) => {}
            Ok(_) => panic!("Expected {} but got Ok in {}", stringify!($variant), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($variant),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SqlBaseError;

    #[test]
    fn test_database_fixture_creation() {
        let fixture = DatabaseFixture::new("test_create").unwrap();
        assert_eq!(fixture.name, "test_create");
        assert!(fixture.path().ends_with("test_create.db"));
    }

    #[test]
    fn test_schema_fixture() {
        let fixture = DatabaseFixture::with_schema("test_schema").unwrap();
        let mut manager = fixture.connect().unwrap();

        let count: i64 = manager
            .execute_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('users', 'posts')",
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_error_assertion_macro() {
        let result: Result<()> = Err(SqlBaseError::NoOpenTransaction);
        assert_sqlbase_error!(result, SqlBaseError::NoOpenTransaction, "macro test");
    }
}
