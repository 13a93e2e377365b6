//! RAII transactions on pooled connections

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use sqlite_conn_pool::{Connection, Pool};
use tracing::{debug, warn};

use crate::{Error, Result};

/// A transaction on a connection, rolled back on drop unless committed.
///
/// Beginning a transaction on a connection that is already inside one opens
/// a savepoint instead, so guards nest: `Transaction::begin(&mut outer)`
/// works because the guard derefs to its [`Connection`].
#[must_use = "if unused, the transaction is immediately rolled back"]
pub struct Transaction<'c> {
   conn: &'c mut Connection,

   /// Connection's transaction depth right after this level began
   depth: u32,

   /// False once committed or rolled back
   active: bool,
}

impl<'c> Transaction<'c> {
   /// Begins an immediate transaction, taking the write lock up front.
   pub fn begin(conn: &'c mut Connection) -> Result<Self> {
      Self::start(conn, true)
   }

   /// Begins a deferred transaction, which takes the write lock on its
   /// first write.
   pub fn begin_deferred(conn: &'c mut Connection) -> Result<Self> {
      Self::start(conn, false)
   }

   fn start(conn: &'c mut Connection, immediate: bool) -> Result<Self> {
      conn.begin_transaction(immediate)?;
      let depth = conn.transaction_depth();
      debug!(id = conn.id(), depth, immediate, "Transaction started");
      Ok(Self {
         conn,
         depth,
         active: true,
      })
   }

   /// Opens a savepoint nested in this transaction.
   pub fn savepoint(&mut self) -> Result<Transaction<'_>> {
      Transaction::begin_deferred(&mut *self.conn)
   }

   /// Nesting level of this transaction; the outermost one is 1.
   pub fn depth(&self) -> u32 {
      self.depth
   }

   /// Commits this level. Changes in a nested level only persist once the
   /// outermost level commits.
   ///
   /// If the commit fails the guard is dropped, which rolls the level back.
   pub fn commit(mut self) -> Result<()> {
      self.check_current()?;
      self.conn.end_transaction(true)?;
      self.active = false;
      debug!(id = self.conn.id(), depth = self.depth, "Transaction committed");
      Ok(())
   }

   /// Rolls this level back.
   pub fn rollback(mut self) -> Result<()> {
      self.check_current()?;
      self.active = false;
      self.conn.end_transaction(false)?;
      debug!(id = self.conn.id(), depth = self.depth, "Transaction rolled back");
      Ok(())
   }

   /// Fails if this level was already ended directly on the connection.
   fn check_current(&mut self) -> Result<()> {
      if self.conn.transaction_depth() != self.depth {
         self.active = false;
         return Err(Error::TransactionAlreadyFinalized);
      }
      Ok(())
   }
}

impl Deref for Transaction<'_> {
   type Target = Connection;

   fn deref(&self) -> &Self::Target {
      &*self.conn
   }
}

impl DerefMut for Transaction<'_> {
   fn deref_mut(&mut self) -> &mut Self::Target {
      &mut *self.conn
   }
}

impl Drop for Transaction<'_> {
   fn drop(&mut self) {
      if !self.active || self.conn.transaction_depth() != self.depth {
         return;
      }
      debug!(id = self.conn.id(), depth = self.depth, "Dropping transaction (will roll back)");
      if let Err(e) = self.conn.end_transaction(false) {
         warn!(id = self.conn.id(), depth = self.depth, error = %e, "Rollback on drop failed");
      }
   }
}

impl std::fmt::Debug for Transaction<'_> {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("Transaction")
         .field("connection", &self.conn.id())
         .field("depth", &self.depth)
         .field("active", &self.active)
         .finish()
   }
}

/// Runs `f` inside an immediate transaction on the pool's writer.
///
/// Commits if `f` returns `Ok`, rolls back if it returns `Err`. When the
/// rollback fails too, both messages are reported in
/// [`Error::TransactionRollbackFailed`]. Blocks until the writer is free.
pub fn execute_transaction<T, F>(pool: &Arc<Pool>, f: F) -> Result<T>
where
   F: FnOnce(&mut Transaction<'_>) -> Result<T>,
{
   let mut writer = pool.borrow_writeable()?;
   let mut tx = Transaction::begin(&mut writer)?;

   match f(&mut tx) {
      Ok(value) => {
         tx.commit()?;
         Ok(value)
      }
      Err(e) => match tx.rollback() {
         // Rollback succeeded, return original error
         Ok(()) => Err(e),

         // Rollback also failed, return the rollback error and the original error
         Err(rollback_err) => Err(Error::TransactionRollbackFailed {
            transaction_error: e.to_string(),
            rollback_error: rollback_err.to_string(),
         }),
      },
   }
}
