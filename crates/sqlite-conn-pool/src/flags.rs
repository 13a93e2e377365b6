//! Flags used when opening a database

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a database file is opened.
///
/// Mirrors SQLite's `SQLITE_OPEN_*` flags, plus two extras that SQLite
/// doesn't have: [`temporary`](Self::temporary) and
/// [`delete_first`](Self::delete_first).
///
/// ```
/// use sqlite_conn_pool::OpenFlags;
///
/// // read-write, create if missing
/// let flags = OpenFlags::default();
/// assert!(flags.readwrite && flags.create);
///
/// let flags = OpenFlags {
///    delete_first: true,
///    ..Default::default()
/// };
/// assert!(flags.normalize().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenFlags {
   /// Open the file writeable, if possible. Without this the database is read-only.
   pub readwrite: bool,

   /// Create the file if it doesn't exist. Requires `readwrite`.
   pub create: bool,

   /// The path may be a `file:` URI
   pub uri: bool,

   /// Symbolic links in the path are not followed
   pub nofollow: bool,

   /// Open an in-memory database. Implies `temporary`.
   pub memory: bool,

   /// Anonymous database deleted on close
   pub temporary: bool,

   /// Delete any existing file (and its `-wal`/`-shm` companions) before the
   /// first open. Requires `readwrite`, implies `create`.
   pub delete_first: bool,
}

impl Default for OpenFlags {
   fn default() -> Self {
      Self {
         readwrite: true,
         create: true,
         uri: false,
         nofollow: false,
         memory: false,
         temporary: false,
         delete_first: false,
      }
   }
}

impl OpenFlags {
   /// Flags for a read-only database: nothing set.
   pub fn read_only() -> Self {
      Self {
         readwrite: false,
         create: false,
         ..Default::default()
      }
   }

   /// True if the database only lives as long as its connection.
   pub fn is_temporary(&self) -> bool {
      self.memory || self.temporary
   }

   /// Resolves implied flags and rejects contradictory combinations.
   pub fn normalize(mut self) -> Result<Self> {
      if self.memory {
         self.temporary = true;
      }
      if self.temporary {
         self.readwrite = true;
         self.create = true;
         self.delete_first = false;
      } else if self.delete_first {
         if !self.readwrite {
            return Err(Error::InvalidFlags("delete_first requires readwrite"));
         }
         self.create = true;
      }
      if self.create && !self.readwrite {
         return Err(Error::InvalidFlags("create requires readwrite"));
      }
      Ok(self)
   }

   /// The same flags, downgraded for opening a read-only connection.
   pub fn for_reader(self) -> Self {
      Self {
         readwrite: false,
         create: false,
         delete_first: false,
         ..self
      }
   }

   /// Converts to the engine's flag set.
   ///
   /// `NO_MUTEX` is always set: a pooled connection is only ever used by the
   /// one caller that borrowed it.
   pub(crate) fn to_sqlite(self) -> rusqlite::OpenFlags {
      use rusqlite::OpenFlags as F;

      let mut flags = F::SQLITE_OPEN_NO_MUTEX;
      if self.readwrite {
         flags |= F::SQLITE_OPEN_READ_WRITE;
      } else {
         flags |= F::SQLITE_OPEN_READ_ONLY;
      }
      if self.create {
         flags |= F::SQLITE_OPEN_CREATE;
      }
      if self.uri {
         flags |= F::SQLITE_OPEN_URI;
      }
      if self.memory {
         flags |= F::SQLITE_OPEN_MEMORY;
      }
      if self.nofollow {
         flags |= F::SQLITE_OPEN_NOFOLLOW;
      }
      flags
   }
}
