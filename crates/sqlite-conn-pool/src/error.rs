//! Error types for sqlite-conn-pool

use std::path::PathBuf;

use thiserror::Error;

/// Errors that may occur when working with sqlite-conn-pool
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
   /// The open flags can't be used, either on their own or for a pool.
   /// In-memory and temporary databases land here because SQLite can't open
   /// more than one connection to them.
   #[error("invalid open flags: {0}")]
   InvalidFlags(&'static str),

   /// A non-temporary database needs a file path
   #[error("an empty path is only allowed for temporary databases")]
   EmptyPath,

   /// Pool capacity below the minimum of one reader plus the writer
   #[error("capacity must be at least 2 (got {0})")]
   InvalidCapacity(usize),

   /// A writeable connection was requested from a pool opened without `readwrite`
   #[error("no writeable connection available: pool was not opened read-write")]
   ReadOnlyPool,

   /// The database opened, but SQLite reports it as read-only (file
   /// permissions, read-only filesystem, `mode=ro` URI, ...)
   #[error("database file is not writeable: {}", .0.display())]
   NotWriteable(PathBuf),

   /// `end_transaction` was called with no transaction open
   #[error("transaction underflow: no transaction is open")]
   TransactionUnderflow,

   /// SQLite is already inside a transaction this connection did not start
   #[error("connection is unexpectedly already in a transaction")]
   AlreadyInTransaction,

   /// Error from SQLite. Standard rusqlite errors are converted to this variant
   #[error("SQLite error: {0}")]
   Sqlite(#[from] rusqlite::Error),

   /// IO error when accessing database files. Standard library IO errors
   /// are converted to this variant.
   #[error("IO error: {0}")]
   Io(#[from] std::io::Error),

   /// A blocking borrow running on tokio's blocking pool panicked or was cancelled
   #[cfg(feature = "tokio")]
   #[error("blocking borrow task failed: {0}")]
   TaskFailed(String),
}

impl Error {
   /// True for errors caused by how the pool was configured or called, as
   /// opposed to failures reported by SQLite or the filesystem. Retrying
   /// these never helps.
   pub fn is_configuration_error(&self) -> bool {
      matches!(
         self,
         Error::InvalidFlags(_)
            | Error::EmptyPath
            | Error::InvalidCapacity(_)
            | Error::ReadOnlyPool
      )
   }

   /// The SQLite primary result code behind this error, if there is one.
   ///
   /// `NotWriteable` maps to `SQLITE_LOCKED`: the file exists but this
   /// process can't take the write side of it.
   pub fn sqlite_code(&self) -> Option<rusqlite::ErrorCode> {
      match self {
         Error::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
         Error::NotWriteable(_) => Some(rusqlite::ErrorCode::DatabaseLocked),
         _ => None,
      }
   }
}

/// A type alias for Results with our Error type
pub type Result<T> = std::result::Result<T, Error>;
