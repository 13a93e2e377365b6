use sqlite_conn_pool::rusqlite;

/// Result type alias for registry and transaction operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised above the connection pool: registry lookups and
/// transaction management.
#[derive(Debug, thiserror::Error)]
pub enum Error {
   /// Error from the connection pool.
   #[error(transparent)]
   Pool(#[from] sqlite_conn_pool::Error),

   /// Error from a statement run directly on a connection.
   #[error(transparent)]
   Sqlite(#[from] rusqlite::Error),

   /// No pool has been loaded for this path.
   #[error("database not loaded: {0}")]
   DatabaseNotLoaded(String),

   /// Transaction failed and rollback also failed.
   #[error("transaction failed: {transaction_error}; rollback also failed: {rollback_error}")]
   TransactionRollbackFailed {
      transaction_error: String,
      rollback_error: String,
   },

   /// Transaction was ended on the connection behind the guard's back.
   #[error("transaction has already been finalized (committed or rolled back)")]
   TransactionAlreadyFinalized,

   /// I/O error when accessing database files.
   #[error("io error: {0}")]
   Io(#[from] std::io::Error),

   /// Generic error for operations that don't fit other categories.
   #[error("{0}")]
   Other(String),
}

impl Error {
   /// Extract a structured error code from the error type.
   ///
   /// SQLite failures map to `SQLITE_<extended result code>`; everything else
   /// gets a fixed upper-case name.
   pub fn error_code(&self) -> String {
      match self {
         Error::Pool(e) => pool_error_code(e),
         Error::Sqlite(e) => sqlite_error_code(e).unwrap_or_else(|| "SQLITE_ERROR".to_string()),
         Error::DatabaseNotLoaded(_) => "DATABASE_NOT_LOADED".to_string(),
         Error::TransactionRollbackFailed { .. } => "TRANSACTION_ROLLBACK_FAILED".to_string(),
         Error::TransactionAlreadyFinalized => "TRANSACTION_ALREADY_FINALIZED".to_string(),
         Error::Io(_) => "IO_ERROR".to_string(),
         Error::Other(_) => "ERROR".to_string(),
      }
   }
}

fn sqlite_error_code(e: &rusqlite::Error) -> Option<String> {
   match e {
      rusqlite::Error::SqliteFailure(err, _) => Some(format!("SQLITE_{}", err.extended_code)),
      _ => None,
   }
}

fn pool_error_code(e: &sqlite_conn_pool::Error) -> String {
   use sqlite_conn_pool::Error as PoolError;

   match e {
      PoolError::Sqlite(e) => sqlite_error_code(e).unwrap_or_else(|| "SQLITE_ERROR".to_string()),
      PoolError::InvalidFlags(_) => "INVALID_FLAGS".to_string(),
      PoolError::EmptyPath => "EMPTY_PATH".to_string(),
      PoolError::InvalidCapacity(_) => "INVALID_CAPACITY".to_string(),
      PoolError::ReadOnlyPool => "READ_ONLY_POOL".to_string(),
      PoolError::NotWriteable(_) => "NOT_WRITEABLE".to_string(),
      PoolError::TransactionUnderflow => "TRANSACTION_UNDERFLOW".to_string(),
      PoolError::AlreadyInTransaction => "TRANSACTION_ALREADY_ACTIVE".to_string(),
      PoolError::Io(_) => "IO_ERROR".to_string(),
      _ => "CONNECTION_ERROR".to_string(),
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn test_error_code_database_not_loaded() {
      let err = Error::DatabaseNotLoaded("/tmp/app.db".into());
      assert_eq!(err.error_code(), "DATABASE_NOT_LOADED");
      assert!(err.to_string().contains("/tmp/app.db"));
   }

   #[test]
   fn test_error_code_rollback_failed() {
      let err = Error::TransactionRollbackFailed {
         transaction_error: "constraint failed".into(),
         rollback_error: "disk I/O error".into(),
      };
      assert_eq!(err.error_code(), "TRANSACTION_ROLLBACK_FAILED");
      let msg = err.to_string();
      assert!(msg.contains("constraint failed"));
      assert!(msg.contains("disk I/O error"));
   }

   #[test]
   fn test_error_code_pool_configuration() {
      let err = Error::from(sqlite_conn_pool::Error::InvalidCapacity(1));
      assert_eq!(err.error_code(), "INVALID_CAPACITY");

      let err = Error::from(sqlite_conn_pool::Error::ReadOnlyPool);
      assert_eq!(err.error_code(), "READ_ONLY_POOL");
   }

   #[test]
   fn test_error_code_sqlite_failure() {
      let failure = rusqlite::Error::SqliteFailure(
         rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
         None,
      );
      assert_eq!(Error::from(failure).error_code(), "SQLITE_5");

      let failure = rusqlite::Error::SqliteFailure(
         rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
         Some("UNIQUE constraint failed".into()),
      );
      let pooled = Error::from(sqlite_conn_pool::Error::Sqlite(failure));
      assert_eq!(pooled.error_code(), "SQLITE_2067");
   }

   #[test]
   fn test_error_code_non_failure_sqlite_error() {
      let err = Error::from(rusqlite::Error::QueryReturnedNoRows);
      assert_eq!(err.error_code(), "SQLITE_ERROR");
   }

   #[test]
   fn test_error_code_other() {
      let err = Error::Other("something went wrong".into());
      assert_eq!(err.error_code(), "ERROR");
      assert_eq!(err.to_string(), "something went wrong");
   }
}
