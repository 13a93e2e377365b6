//! # sqlite-pool
//!
//! Application-level SQLite access built on [`sqlite_conn_pool`]: a registry
//! that keeps exactly one pool per database file, and RAII transactions on
//! pooled connections.
//!
//! # Example
//!
//! ```no_run
//! use sqlite_pool::{PoolRegistry, execute_transaction};
//!
//! # fn main() -> sqlite_pool::Result<()> {
//! let registry = PoolRegistry::new();
//! let pool = registry.load("app.db", None)?;
//!
//! execute_transaction(&pool, |tx| {
//!    tx.execute("CREATE TABLE IF NOT EXISTS notes (body TEXT)", [])?;
//!    tx.execute("INSERT INTO notes (body) VALUES (?1)", ["hello"])?;
//!    Ok(())
//! })?;
//!
//! let reader = pool.borrow()?;
//! let count: i64 = reader.query_row("SELECT count(*) FROM notes", [], |row| row.get(0))?;
//! # let _ = count;
//! registry.close_all();
//! # Ok(())
//! # }
//! ```

mod error;
mod registry;
mod transactions;

pub use error::{Error, Result};
pub use registry::PoolRegistry;
pub use transactions::{Transaction, execute_transaction};

// Re-export the pool so callers need a single dependency
pub use sqlite_conn_pool::{
   BorrowedConnection, BorrowedWriteable, Connection, OpenFlags, Pool, PoolConfig, rusqlite,
};
