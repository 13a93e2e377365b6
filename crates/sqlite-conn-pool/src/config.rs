//! Configuration for SQLite connection pools

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, OpenFlags, Result};

/// Smallest usable capacity: one reader plus the writer.
pub const MIN_CAPACITY: usize = 2;

/// Configuration for [`Pool`](crate::Pool)s
///
/// # Examples
///
/// ```
/// use sqlite_conn_pool::PoolConfig;
/// use std::time::Duration;
///
/// // Use defaults
/// let config = PoolConfig::default();
///
/// // Override just a few fields
/// let config = PoolConfig {
///    capacity: 8,
///    busy_timeout: Duration::from_secs(2),
///    ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
   /// Flags every connection is opened with. Readers are opened with the
   /// same flags downgraded to read-only.
   ///
   /// Default: read-write, create if missing
   pub flags: OpenFlags,

   /// Name of the SQLite VFS to open connections with
   ///
   /// Default: none (SQLite's default VFS)
   pub vfs: Option<String>,

   /// Maximum number of connections open at once, counting the single
   /// writeable connection
   ///
   /// Default: 5
   pub capacity: usize,

   /// How long a connection waits on a locked database before failing with
   /// `SQLITE_BUSY`. Only applied when `setup_connection` is on.
   ///
   /// Default: 5 seconds
   pub busy_timeout: Duration,

   /// Apply the recommended per-connection settings (busy timeout, foreign
   /// keys, `synchronous = NORMAL` on the writer) before the `on_open`
   /// callback runs
   ///
   /// Default: true
   pub setup_connection: bool,

   /// Switch the file to WAL journal mode when the writer is first opened,
   /// so readers don't block on the writer
   ///
   /// Default: true
   pub journal_mode_wal: bool,
}

impl Default for PoolConfig {
   fn default() -> Self {
      Self {
         flags: OpenFlags::default(),
         vfs: None,
         capacity: 5,
         busy_timeout: Duration::from_secs(5),
         setup_connection: true,
         journal_mode_wal: true,
      }
   }
}

impl PoolConfig {
   /// Checks the configuration can back a pool, returning the normalized flags.
   pub fn validate(&self) -> Result<OpenFlags> {
      if self.capacity < MIN_CAPACITY {
         return Err(Error::InvalidCapacity(self.capacity));
      }
      let flags = self.flags.normalize()?;
      if flags.is_temporary() {
         return Err(Error::InvalidFlags(
            "pool does not support in-memory or temporary databases",
         ));
      }
      if flags.delete_first && flags.uri {
         return Err(Error::InvalidFlags("delete_first can't be used with a URI path"));
      }
      Ok(flags)
   }
}
