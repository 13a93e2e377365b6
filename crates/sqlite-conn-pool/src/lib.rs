//! # sqlite-conn-pool
//!
//! A thread-safe pool of SQLite connections that enforces SQLite's own
//! concurrency rule: any number of readers, one writer.
//!
//! ## Core Types
//!
//! - **[`Pool`]**: Hands out read-only connections and the single writeable one
//! - **[`PoolConfig`]**: Capacity, open flags, VFS and per-connection setup
//! - **[`OpenFlags`]**: How the database file is opened
//! - **[`Connection`]**: One SQLite connection, tracking its transaction depth
//! - **[`BorrowedConnection`]** / **[`BorrowedWriteable`]**: RAII handles that
//!   return their connection to the pool on drop
//! - **[`Error`]**: Error type for pool operations
//!
//! ## Architecture
//!
//! - **Lazy connections**: nothing is opened until the first borrow, so a
//!   bad path is reported by `borrow`, not by `Pool::new`
//! - **Single writer**: at most one writeable connection exists per pool and
//!   it is recycled for the pool's lifetime
//! - **Blocking and non-blocking borrows**: `borrow*` waits on a condition
//!   variable, `try_borrow*` returns `None` when nothing is free
//! - **Shrink without pre-emption**: lowering capacity closes idle readers
//!   now and borrowed ones when they come back
//! - **Async adapters**: with the `tokio` feature, `borrow_async` and
//!   `borrow_writeable_async` wait on tokio's blocking pool

mod borrowed;
mod config;
mod connection;
mod error;
mod flags;
mod pool;

#[cfg(feature = "tokio")]
mod async_borrow;

// Re-export public types
pub use borrowed::{BorrowedConnection, BorrowedWriteable};
pub use config::{MIN_CAPACITY, PoolConfig};
pub use connection::{Connection, delete_database_files};
pub use error::{Error, Result};
pub use flags::OpenFlags;
pub use pool::{Initializer, Pool};

// Re-export rusqlite so callers use the same version the pool was built with
pub use rusqlite;
