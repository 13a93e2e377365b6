//! A single SQLite connection, as managed by the pool

use std::io::ErrorKind;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use rusqlite::DatabaseName;
use tracing::{debug, warn};

use crate::{Error, OpenFlags, Result};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// One open SQLite connection.
///
/// Derefs to [`rusqlite::Connection`] for running statements. Transactions
/// should go through [`begin_transaction`](Self::begin_transaction) and
/// [`end_transaction`](Self::end_transaction) so the connection knows its
/// [`transaction_depth`](Self::transaction_depth); the pool refuses to
/// recycle a connection that is still inside one.
#[derive(Debug)]
pub struct Connection {
   conn: rusqlite::Connection,

   /// Path as given to `open`, for logging and errors
   path: PathBuf,

   /// Process-unique sequence number, assigned at open
   id: u64,

   /// Number of nested `begin_transaction` calls not yet ended
   transaction_depth: u32,

   /// Whether the outermost transaction was started with `BEGIN IMMEDIATE`
   immediate: bool,
}

impl Connection {
   /// Opens a connection.
   ///
   /// An empty path is only accepted for temporary databases. A plain path
   /// starting with `:` is opened as `./:...` so it is never mistaken for
   /// `:memory:`.
   pub fn open(path: impl AsRef<Path>, flags: &OpenFlags, vfs: Option<&str>) -> Result<Self> {
      let path = path.as_ref();
      let flags = flags.normalize()?;
      let target = resolve_path(path, &flags)?;

      if flags.delete_first {
         if flags.uri {
            return Err(Error::InvalidFlags("delete_first can't be used with a URI path"));
         }
         delete_database_files(&target)?;
      }

      let conn = match vfs {
         Some(vfs) => rusqlite::Connection::open_with_flags_and_vfs(&target, flags.to_sqlite(), vfs)?,
         None => rusqlite::Connection::open_with_flags(&target, flags.to_sqlite())?,
      };

      let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
      debug!(id, path = %path.display(), readwrite = flags.readwrite, "Opened SQLite connection");

      Ok(Self {
         conn,
         path: path.to_path_buf(),
         id,
         transaction_depth: 0,
         immediate: false,
      })
   }

   /// Process-unique id, assigned in open order.
   pub fn id(&self) -> u64 {
      self.id
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   /// True if the `main` database accepts writes. Depends on the file's
   /// permissions as well as the flags it was opened with.
   pub fn is_writeable(&self) -> bool {
      match self.conn.is_readonly(DatabaseName::Main) {
         Ok(readonly) => !readonly,
         Err(e) => {
            warn!(id = self.id, error = %e, "Could not query read-only status");
            false
         }
      }
   }

   /// True if SQLite has a transaction open, whoever started it.
   pub fn in_transaction(&self) -> bool {
      !self.conn.is_autocommit()
   }

   /// Number of transactions opened with `begin_transaction` and not yet ended.
   pub fn transaction_depth(&self) -> u32 {
      self.transaction_depth
   }

   /// Begins a transaction, or a savepoint nested in the current one.
   ///
   /// With `immediate`, the outermost level is `BEGIN IMMEDIATE`, which takes
   /// the write lock up front instead of failing on the first write if
   /// another connection holds it. `immediate` is ignored for nested levels.
   pub fn begin_transaction(&mut self, immediate: bool) -> Result<()> {
      if self.transaction_depth == 0 {
         if self.in_transaction() {
            return Err(Error::AlreadyInTransaction);
         }
         self.immediate = immediate;
      }

      let sql = if self.transaction_depth == 0 && self.immediate {
         "BEGIN IMMEDIATE".to_string()
      } else {
         format!("SAVEPOINT sp_{}", self.transaction_depth + 1)
      };
      self.conn.execute_batch(&sql)?;

      self.transaction_depth += 1;
      Ok(())
   }

   /// Ends the innermost transaction level, committing or rolling it back.
   ///
   /// Changes committed in a nested level are only persisted once the
   /// outermost level commits. On failure the depth is unchanged, so the
   /// caller can retry or roll back.
   pub fn end_transaction(&mut self, commit: bool) -> Result<()> {
      let depth = self.transaction_depth;
      if depth == 0 {
         return Err(Error::TransactionUnderflow);
      }

      // Some errors (SQLITE_FULL, SQLITE_IOERR, ...) make SQLite roll back
      // on its own, taking every savepoint with it.
      if !commit && !self.in_transaction() {
         warn!(id = self.id, depth, "Transaction was already rolled back by SQLite");
         self.transaction_depth = 0;
         return Ok(());
      }

      if depth == 1 && self.immediate {
         self.conn.execute_batch(if commit { "COMMIT" } else { "ROLLBACK" })?;
      } else {
         // ROLLBACK TO rewinds but leaves the savepoint on the stack; RELEASE pops it.
         let sql = if commit {
            format!("RELEASE SAVEPOINT sp_{depth}")
         } else {
            format!("ROLLBACK TO SAVEPOINT sp_{depth}; RELEASE SAVEPOINT sp_{depth}")
         };
         self.conn.execute_batch(&sql)?;
      }

      self.transaction_depth -= 1;
      Ok(())
   }

   /// Applies the recommended per-connection settings: a busy timeout,
   /// foreign-key enforcement, and `synchronous = NORMAL` when writeable.
   pub fn setup_connection(&self, busy_timeout: Duration) -> Result<()> {
      self.conn.busy_timeout(busy_timeout)?;
      self.conn.pragma_update(None, "foreign_keys", true)?;
      if self.is_writeable() {
         self.conn.pragma_update(None, "synchronous", "NORMAL")?;
      }
      Ok(())
   }

   /// Switches the database file to WAL journal mode. The setting is
   /// persistent, so this only needs to run on one connection.
   pub fn enable_wal(&self) -> Result<()> {
      let mode: String = self
         .conn
         .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
      if !mode.eq_ignore_ascii_case("wal") {
         warn!(id = self.id, mode = %mode, "Database did not switch to WAL journal mode");
      }
      Ok(())
   }

   /// Closes the connection, reporting any error SQLite returns.
   ///
   /// Dropping a `Connection` also closes it, but silently.
   pub fn close(self) -> Result<()> {
      let id = self.id;
      self.conn.close().map_err(|(_, e)| Error::Sqlite(e))?;
      debug!(id, "Closed SQLite connection");
      Ok(())
   }
}

impl Deref for Connection {
   type Target = rusqlite::Connection;

   fn deref(&self) -> &Self::Target {
      &self.conn
   }
}

fn resolve_path(path: &Path, flags: &OpenFlags) -> Result<PathBuf> {
   if flags.is_temporary() {
      // An empty filename gives a private database: on disk and deleted on
      // close, or in memory with SQLITE_OPEN_MEMORY.
      return Ok(PathBuf::new());
   }
   if path.as_os_str().is_empty() {
      return Err(Error::EmptyPath);
   }
   if !flags.uri && path.to_string_lossy().starts_with(':') {
      return Ok(Path::new(".").join(path));
   }
   Ok(path.to_path_buf())
}

/// Deletes a database file along with its WAL and shared-memory files.
/// Missing files are not an error.
pub fn delete_database_files(path: &Path) -> std::io::Result<()> {
   for suffix in ["", "-wal", "-shm"] {
      let mut file = path.as_os_str().to_owned();
      file.push(suffix);
      match std::fs::remove_file(&file) {
         Ok(()) => debug!(file = ?file, "Deleted database file"),
         Err(e) if e.kind() == ErrorKind::NotFound => {}
         Err(e) => return Err(e),
      }
   }
   Ok(())
}
