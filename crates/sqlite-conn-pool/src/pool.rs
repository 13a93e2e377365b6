//! Thread-safe pool of SQLite connections: many readers, one writer

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace, warn};

use crate::borrowed::{BorrowedConnection, BorrowedWriteable};
use crate::config::MIN_CAPACITY;
use crate::connection::delete_database_files;
use crate::{Connection, Error, OpenFlags, PoolConfig, Result};

/// Callback run on every newly opened connection before it is handed out.
pub type Initializer = Arc<dyn Fn(&mut Connection) -> Result<()> + Send + Sync>;

/// Everything guarded by the pool's mutex.
struct PoolState {
   /// Maximum number of read-only connections. The writer is not counted.
   ro_capacity: usize,

   /// Read-only connections opened and not yet closed, idle or borrowed
   ro_total: usize,

   /// 1 while the writeable connection exists, idle or borrowed
   rw_total: usize,

   /// Idle read-only connections, used as a stack: the most recently
   /// returned connection is handed out first
   idle_readonly: Vec<Connection>,

   /// The writeable connection, while it is idle
   idle_readwrite: Option<Connection>,

   initializer: Option<Initializer>,

   /// Set until the first connection is opened, if `delete_first` was requested
   delete_first_pending: bool,
}

impl PoolState {
   fn borrowed_count(&self) -> usize {
      (self.ro_total - self.idle_readonly.len())
         + (self.rw_total - usize::from(self.idle_readwrite.is_some()))
   }

   fn open_count(&self) -> usize {
      self.ro_total + self.rw_total
   }

   /// Removes every idle connection and its count, returning them for closing.
   fn take_unused(&mut self) -> Vec<Connection> {
      let mut unused: Vec<Connection> = self.idle_readonly.drain(..).collect();
      self.ro_total -= unused.len();
      if let Some(writer) = self.idle_readwrite.take() {
         self.rw_total = 0;
         unused.push(writer);
      }
      unused
   }
}

/// A thread-safe pool of connections to one SQLite database file.
///
/// SQLite allows any number of concurrent readers but only one writer, so
/// the pool hands out two kinds of connection:
///
/// - [`borrow`](Self::borrow) / [`try_borrow`](Self::try_borrow): a
///   read-only connection. Up to `capacity - 1` of these exist at once.
/// - [`borrow_writeable`](Self::borrow_writeable) /
///   [`try_borrow_writeable`](Self::try_borrow_writeable): the single
///   writeable connection.
///
/// Connections are opened lazily, so a bad path or unreadable file surfaces
/// as an error from the first borrow rather than from [`Pool::new`].
/// Dropping a borrowed handle returns its connection to the pool.
///
/// ```no_run
/// use sqlite_conn_pool::{OpenFlags, Pool};
///
/// # fn main() -> sqlite_conn_pool::Result<()> {
/// let pool = Pool::new("app.db", OpenFlags::default(), None)?;
///
/// let writer = pool.borrow_writeable()?;
/// writer.execute("CREATE TABLE IF NOT EXISTS notes (body TEXT)", [])?;
/// drop(writer);
///
/// let reader = pool.borrow()?;
/// let count: i64 = reader.query_row("SELECT count(*) FROM notes", [], |row| row.get(0))?;
/// # Ok(())
/// # }
/// ```
pub struct Pool {
   path: PathBuf,

   /// Normalized copy of `config.flags`
   flags: OpenFlags,

   config: PoolConfig,

   state: Mutex<PoolState>,

   /// Signalled (broadcast) whenever a connection comes back or a slot frees up
   available: Condvar,
}

impl Pool {
   /// Creates a pool for the database at `path`. Nothing is opened yet.
   ///
   /// - Without `flags.readwrite`, the writeable connection can't be borrowed.
   /// - `memory` and `temporary` are rejected: SQLite can't open several
   ///   connections to one temporary database.
   /// - `delete_first` is honoured before the first connection is opened
   ///   and ignored after that.
   pub fn new(path: impl AsRef<Path>, flags: OpenFlags, vfs: Option<&str>) -> Result<Arc<Self>> {
      let config = PoolConfig {
         flags,
         vfs: vfs.map(str::to_owned),
         ..Default::default()
      };
      Self::with_config(path, config)
   }

   /// Creates a pool with full control over its configuration.
   pub fn with_config(path: impl AsRef<Path>, config: PoolConfig) -> Result<Arc<Self>> {
      let flags = config.validate()?;
      let path = path.as_ref();
      if path.as_os_str().is_empty() {
         return Err(Error::EmptyPath);
      }

      debug!(
         path = %path.display(),
         capacity = config.capacity,
         readwrite = flags.readwrite,
         "Created connection pool"
      );

      Ok(Arc::new(Self {
         path: path.to_path_buf(),
         flags,
         state: Mutex::new(PoolState {
            ro_capacity: config.capacity - 1,
            ro_total: 0,
            rw_total: 0,
            idle_readonly: Vec::new(),
            idle_readwrite: None,
            initializer: None,
            delete_first_pending: flags.delete_first,
         }),
         available: Condvar::new(),
         config,
      }))
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   /// The configuration the pool was created with. `capacity` reflects the
   /// initial value; see [`capacity`](Self::capacity) for the current one.
   pub fn config(&self) -> &PoolConfig {
      &self.config
   }

   /// True if the pool can hand out a writeable connection.
   pub fn is_writeable(&self) -> bool {
      self.flags.readwrite
   }

   /// Maximum number of connections the pool will have open at once,
   /// including the writeable one.
   pub fn capacity(&self) -> usize {
      self.state.lock().ro_capacity + 1
   }

   /// Sets the maximum number of connections, including the writeable one.
   ///
   /// Idle read-only connections beyond the new limit are closed right away.
   /// Borrowed ones are not revoked; they are closed instead of recycled when
   /// they come back.
   pub fn set_capacity(&self, capacity: usize) -> Result<()> {
      if capacity < MIN_CAPACITY {
         return Err(Error::InvalidCapacity(capacity));
      }

      let evicted = {
         let mut state = self.state.lock();
         state.ro_capacity = capacity - 1;

         let borrowed_readers = state.ro_total - state.idle_readonly.len();
         let keep = state.ro_capacity.saturating_sub(borrowed_readers);
         let excess = state.idle_readonly.len().saturating_sub(keep);

         // Bottom of the stack has been idle longest
         let evicted: Vec<Connection> = state.idle_readonly.drain(..excess).collect();
         state.ro_total -= evicted.len();
         evicted
      };

      debug!(path = %self.path.display(), capacity, evicted = evicted.len(), "Set pool capacity");
      close_connections(evicted);

      // A larger capacity may let waiting borrowers open new connections
      self.available.notify_all();
      Ok(())
   }

   /// Registers a callback run on every connection just after it is opened,
   /// for connection-level setup such as pragmas or SQL functions. Not for
   /// file-level work like creating tables: it runs once per connection.
   ///
   /// The callback runs with the pool locked and must not call back into it.
   /// If it fails, the new connection is closed and the borrow fails.
   pub fn on_open<F>(&self, initializer: F)
   where
      F: Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
   {
      self.state.lock().initializer = Some(Arc::new(initializer));
   }

   /// Number of open connections, borrowed or idle.
   pub fn open_count(&self) -> usize {
      self.state.lock().open_count()
   }

   /// Number of connections currently borrowed.
   pub fn borrowed_count(&self) -> usize {
      self.state.lock().borrowed_count()
   }

   /// Number of open connections waiting to be borrowed.
   pub fn idle_count(&self) -> usize {
      let state = self.state.lock();
      state.idle_readonly.len() + usize::from(state.idle_readwrite.is_some())
   }

   /// Borrows a read-only connection, waiting for one to be returned if
   /// they are all in use.
   ///
   /// Fails if a new connection has to be opened and opening it fails.
   pub fn borrow(self: &Arc<Self>) -> Result<BorrowedConnection> {
      let mut state = self.state.lock();
      loop {
         if let Some(conn) = self.take_readonly(&mut state)? {
            return Ok(BorrowedConnection::new(Arc::clone(self), conn));
         }
         trace!(path = %self.path.display(), "Waiting for a read-only connection");
         self.available.wait(&mut state);
      }
   }

   /// Like [`borrow`](Self::borrow), but returns `None` instead of waiting.
   pub fn try_borrow(self: &Arc<Self>) -> Result<Option<BorrowedConnection>> {
      let mut state = self.state.lock();
      let conn = self.take_readonly(&mut state)?;
      Ok(conn.map(|conn| BorrowedConnection::new(Arc::clone(self), conn)))
   }

   /// Borrows the writeable connection, waiting for it to be returned if it
   /// is in use. There is only one per pool.
   ///
   /// Fails with [`Error::ReadOnlyPool`] if the pool was created without
   /// `readwrite`, and with [`Error::NotWriteable`] if the file opens but
   /// SQLite won't write to it.
   pub fn borrow_writeable(self: &Arc<Self>) -> Result<BorrowedWriteable> {
      self.check_writeable()?;
      let mut state = self.state.lock();
      loop {
         if let Some(conn) = self.take_writeable(&mut state)? {
            return Ok(BorrowedWriteable::new(Arc::clone(self), conn));
         }
         trace!(path = %self.path.display(), "Waiting for the writeable connection");
         self.available.wait(&mut state);
      }
   }

   /// Like [`borrow_writeable`](Self::borrow_writeable), but returns `None`
   /// instead of waiting.
   pub fn try_borrow_writeable(self: &Arc<Self>) -> Result<Option<BorrowedWriteable>> {
      self.check_writeable()?;
      let mut state = self.state.lock();
      let conn = self.take_writeable(&mut state)?;
      Ok(conn.map(|conn| BorrowedWriteable::new(Arc::clone(self), conn)))
   }

   /// Closes every connection that isn't borrowed. The pool opens new ones
   /// on demand afterwards, up to its capacity.
   pub fn close_unused(&self) {
      let unused = self.state.lock().take_unused();
      debug!(path = %self.path.display(), closed = unused.len(), "Closing unused connections");
      close_connections(unused);
      self.available.notify_all();
   }

   /// Closes idle connections, waits until every borrowed connection has
   /// been returned, then closes those too.
   ///
   /// Blocks forever if the calling thread itself holds a borrowed handle.
   /// Dropping the pool does the same, but by then no handle can exist,
   /// since each one keeps the pool alive.
   pub fn close_all(&self) {
      self.close_unused();

      let remaining = {
         let mut state = self.state.lock();
         while state.borrowed_count() > 0 {
            trace!(
               path = %self.path.display(),
               borrowed = state.borrowed_count(),
               "Waiting for borrowed connections to be returned"
            );
            self.available.wait(&mut state);
         }
         state.take_unused()
      };

      debug!(path = %self.path.display(), closed = remaining.len(), "Closed all connections");
      close_connections(remaining);
   }

   fn check_writeable(&self) -> Result<()> {
      if self.flags.readwrite {
         Ok(())
      } else {
         Err(Error::ReadOnlyPool)
      }
   }

   /// One attempt at getting a read-only connection: idle first, then a new
   /// one if under capacity.
   fn take_readonly(&self, state: &mut PoolState) -> Result<Option<Connection>> {
      if let Some(conn) = state.idle_readonly.pop() {
         trace!(id = conn.id(), "Borrowed idle read-only connection");
         return Ok(Some(conn));
      }
      if state.ro_total < state.ro_capacity {
         let conn = self.open_connection(state, false)?;
         state.ro_total += 1;
         return Ok(Some(conn));
      }
      Ok(None)
   }

   /// One attempt at getting the writeable connection: open it if it has
   /// never been opened, else take it if idle.
   fn take_writeable(&self, state: &mut PoolState) -> Result<Option<Connection>> {
      if state.rw_total == 0 {
         let conn = self.open_connection(state, true)?;
         state.rw_total = 1;
         return Ok(Some(conn));
      }
      let conn = state.idle_readwrite.take();
      if let Some(conn) = &conn {
         trace!(id = conn.id(), "Borrowed writeable connection");
      }
      Ok(conn)
   }

   /// Opens and prepares a new connection. On any failure the connection is
   /// closed and the pool's counts are left untouched.
   fn open_connection(&self, state: &mut PoolState, writeable: bool) -> Result<Connection> {
      if state.delete_first_pending {
         delete_database_files(&self.path)?;
         state.delete_first_pending = false;
      }

      let flags = if writeable {
         OpenFlags {
            delete_first: false,
            ..self.flags
         }
      } else {
         self.flags.for_reader()
      };

      let mut conn = Connection::open(&self.path, &flags, self.config.vfs.as_deref())?;

      if writeable && !conn.is_writeable() {
         warn!(path = %self.path.display(), "Database opened read-only; discarding writer");
         close_connections([conn]);
         return Err(Error::NotWriteable(self.path.clone()));
      }

      if let Err(e) = self.prepare_connection(&mut conn, state.initializer.as_ref(), writeable) {
         warn!(id = conn.id(), error = %e, "Failed to prepare new connection");
         close_connections([conn]);
         return Err(e);
      }

      debug!(
         id = conn.id(),
         writeable,
         open = state.open_count() + 1,
         "Opened pooled connection"
      );
      Ok(conn)
   }

   fn prepare_connection(
      &self,
      conn: &mut Connection,
      initializer: Option<&Initializer>,
      writeable: bool,
   ) -> Result<()> {
      if self.config.setup_connection {
         conn.setup_connection(self.config.busy_timeout)?;
      }
      if writeable && self.config.journal_mode_wal {
         conn.enable_wal()?;
      }
      if let Some(initializer) = initializer {
         initializer(conn)?;
      }
      Ok(())
   }

   /// Called when a `BorrowedConnection` is dropped.
   pub(crate) fn return_readonly(&self, conn: Connection) {
      let mut state = self.state.lock();
      debug_assert!(state.idle_readonly.len() < state.ro_total);

      let in_transaction = conn.in_transaction();
      let id = conn.id();

      if in_transaction {
         state.ro_total -= 1;
         drop(state);
         error!(id, "Read-only connection returned inside a transaction; closing it");
         close_connections([conn]);
         self.available.notify_all();
      } else if state.ro_total <= state.ro_capacity {
         trace!(id, "Returned read-only connection");
         state.idle_readonly.push(conn);
         drop(state);
         self.available.notify_all();
      } else {
         // Capacity was lowered while this one was out
         state.ro_total -= 1;
         drop(state);
         debug!(id, "Closing read-only connection above capacity");
         close_connections([conn]);
      }

      // Checked last, once the pool is consistent again
      debug_assert!(!in_transaction, "read-only connection {id} returned inside a transaction");
   }

   /// Called when a `BorrowedWriteable` is dropped.
   pub(crate) fn return_writeable(&self, conn: Connection) {
      let mut state = self.state.lock();
      debug_assert_eq!(state.rw_total, 1);
      debug_assert!(state.idle_readwrite.is_none());

      let depth = conn.transaction_depth();
      let in_transaction = depth > 0 || conn.in_transaction();
      let id = conn.id();

      if in_transaction {
         // Never recycle a writer mid-transaction: the next borrower would
         // inherit it. The slot is reopened on the next borrow.
         state.rw_total = 0;
         drop(state);
         error!(id, depth, "Writeable connection returned inside a transaction; closing it");
         close_connections([conn]);
      } else {
         trace!(id, "Returned writeable connection");
         state.idle_readwrite = Some(conn);
         drop(state);
      }
      self.available.notify_all();

      // Checked last, once the pool is consistent again
      debug_assert!(
         !in_transaction,
         "writeable connection {id} returned inside a transaction (depth {depth})"
      );
   }
}

impl Drop for Pool {
   fn drop(&mut self) {
      // Every handle holds an `Arc<Pool>`, so nothing is borrowed by now and
      // this never waits.
      self.close_all();
   }
}

impl fmt::Debug for Pool {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let state = self.state.lock();
      f.debug_struct("Pool")
         .field("path", &self.path)
         .field("capacity", &(state.ro_capacity + 1))
         .field("open", &state.open_count())
         .field("borrowed", &state.borrowed_count())
         .finish()
   }
}

fn close_connections(conns: impl IntoIterator<Item = Connection>) {
   for conn in conns {
      let id = conn.id();
      if let Err(e) = conn.close() {
         warn!(id, error = %e, "Failed to close connection");
      }
   }
}
