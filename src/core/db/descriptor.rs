/// Connection Descriptor Module
///
/// Parses the string handed to `ConnectionManager::connect`. Two shapes are
/// accepted: a bare database path (`app.db`, `:memory:`, `file:` URIs) or a
/// `key=value;` list such as `Data Source=app.db;Mode=ReadOnly;Busy Timeout=500`.
use crate::core::{Result, SqlBaseError};
use rusqlite::OpenFlags;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the database file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Open for reading and writing, creating the file if needed
    #[default]
    ReadWriteCreate,
    /// Open for reading and writing; the file must exist
    ReadWrite,
    /// Open read-only
    ReadOnly,
    /// Private in-memory database; the data source is only a name
    Memory,
}

impl OpenMode {
    fn flags(self) -> OpenFlags {
        match self {
            OpenMode::ReadWriteCreate => {
                OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
            }
            OpenMode::ReadWrite => OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenMode::ReadOnly => OpenFlags::SQLITE_OPEN_READ_ONLY,
            OpenMode::Memory => {
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_MEMORY
            }
        }
    }
}

impl FromStr for OpenMode {
    type Err = SqlBaseError;

    fn from_str(s: &str) -> Result<Self> {
        match normalize_key(s).as_str() {
            "readwritecreate" => Ok(OpenMode::ReadWriteCreate),
            "readwrite" => Ok(OpenMode::ReadWrite),
            "readonly" => Ok(OpenMode::ReadOnly),
            "memory" => Ok(OpenMode::Memory),
            _ => Err(SqlBaseError::InvalidArgument(format!(
                "Unknown open mode '{}'",
                s
            ))),
        }
    }
}

/// A parsed connection descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDescriptor {
    /// Path, URI, or `:memory:`
    pub data_source: String,
    pub mode: OpenMode,
    /// Overrides the manager's foreign key setting when present
    pub foreign_keys: Option<bool>,
    /// Overrides the manager's busy timeout when present
    pub busy_timeout: Option<Duration>,
}

impl ConnectionDescriptor {
    /// Parses a descriptor string.
    ///
    /// # Errors
    ///
    /// Returns `SqlBaseError::InvalidArgument` if the string is empty, if a
    /// key/value list has no data source, or if any pair is malformed.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let trimmed = descriptor.trim();
        if trimmed.is_empty() {
            return Err(SqlBaseError::InvalidArgument(
                "The connection string is null or empty.".to_string(),
            ));
        }

        if trimmed.starts_with("file:") || !trimmed.contains('=') {
            return Ok(ConnectionDescriptor {
                data_source: trimmed.to_string(),
                mode: OpenMode::default(),
                foreign_keys: None,
                busy_timeout: None,
            });
        }

        Self::parse_pairs(trimmed)
    }

    fn parse_pairs(descriptor: &str) -> Result<Self> {
        let mut data_source = None;
        let mut mode = OpenMode::default();
        let mut foreign_keys = None;
        let mut busy_timeout = None;

        for segment in descriptor.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (key, value) = segment.split_once('=').ok_or_else(|| {
                SqlBaseError::InvalidArgument(format!(
                    "Expected key=value in connection string, found '{}'",
                    segment
                ))
            })?;
            let value = value.trim();

            match normalize_key(key).as_str() {
                "datasource" | "filename" => data_source = Some(value.to_string()),
                "mode" => mode = value.parse()?,
                "foreignkeys" => foreign_keys = Some(parse_bool(key, value)?),
                "busytimeout" | "defaulttimeout" => {
                    let millis = value.parse::<u64>().map_err(|_| {
                        SqlBaseError::InvalidArgument(format!(
                            "'{}' must be a number of milliseconds, found '{}'",
                            key.trim(),
                            value
                        ))
                    })?;
                    busy_timeout = Some(Duration::from_millis(millis));
                }
                _ => {
                    return Err(SqlBaseError::InvalidArgument(format!(
                        "Unknown connection string key '{}'",
                        key.trim()
                    )))
                }
            }
        }

        // An in-memory database needs no file name
        if mode == OpenMode::Memory && data_source.is_none() {
            data_source = Some(":memory:".to_string());
        }

        let data_source = data_source.filter(|s| !s.is_empty()).ok_or_else(|| {
            SqlBaseError::InvalidArgument(
                "The connection string does not name a data source.".to_string(),
            )
        })?;

        Ok(ConnectionDescriptor {
            data_source,
            mode,
            foreign_keys,
            busy_timeout,
        })
    }

    /// Flags passed to `Connection::open_with_flags`
    pub fn open_flags(&self) -> OpenFlags {
        self.mode.flags() | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
    }

    /// Returns `true` for private in-memory databases
    pub fn is_memory(&self) -> bool {
        self.mode == OpenMode::Memory
            || self.data_source == ":memory:"
            || self.data_source.contains("mode=memory")
    }
}

impl FromStr for ConnectionDescriptor {
    type Err = SqlBaseError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.data_source, self.mode)
    }
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| !c.is_whitespace() && *c != '_')
        .flat_map(char::to_lowercase)
        .collect()
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(SqlBaseError::InvalidArgument(format!(
            "'{}' must be a boolean, found '{}'",
            key.trim(),
            value
        ))),
    }
}
