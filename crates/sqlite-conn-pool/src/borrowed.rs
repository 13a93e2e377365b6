//! Handles to connections borrowed from a [`Pool`]

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::{Connection, Pool};

/// A read-only connection borrowed from a [`Pool`].
///
/// Derefs to [`Connection`] (and through it to `rusqlite::Connection`).
/// Dropping the handle returns the connection to the pool.
#[must_use = "if unused, the connection is immediately returned to the pool"]
pub struct BorrowedConnection {
   pool: Arc<Pool>,
   /// Always `Some` until dropped
   conn: Option<Connection>,
}

impl BorrowedConnection {
   pub(crate) fn new(pool: Arc<Pool>, conn: Connection) -> Self {
      Self {
         pool,
         conn: Some(conn),
      }
   }

   /// The pool this connection will be returned to.
   pub fn pool(&self) -> &Arc<Pool> {
      &self.pool
   }
}

impl Deref for BorrowedConnection {
   type Target = Connection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect("connection already returned")
   }
}

impl Drop for BorrowedConnection {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         self.pool.return_readonly(conn);
      }
   }
}

impl fmt::Debug for BorrowedConnection {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("BorrowedConnection")
         .field("id", &self.conn.as_ref().map(Connection::id))
         .field("path", &self.pool.path())
         .finish()
   }
}

/// The writeable connection, borrowed from a [`Pool`].
///
/// Only one exists per pool, so holding this handle is what makes the caller
/// the database's writer. Dropping it returns the connection; it must not be
/// inside a transaction by then.
#[must_use = "if unused, the write lock is immediately released"]
pub struct BorrowedWriteable {
   pool: Arc<Pool>,
   /// Always `Some` until dropped
   conn: Option<Connection>,
}

impl BorrowedWriteable {
   pub(crate) fn new(pool: Arc<Pool>, conn: Connection) -> Self {
      Self {
         pool,
         conn: Some(conn),
      }
   }

   /// The pool this connection will be returned to.
   pub fn pool(&self) -> &Arc<Pool> {
      &self.pool
   }
}

impl Deref for BorrowedWriteable {
   type Target = Connection;

   fn deref(&self) -> &Self::Target {
      self.conn.as_ref().expect("connection already returned")
   }
}

impl DerefMut for BorrowedWriteable {
   fn deref_mut(&mut self) -> &mut Self::Target {
      self.conn.as_mut().expect("connection already returned")
   }
}

impl Drop for BorrowedWriteable {
   fn drop(&mut self) {
      if let Some(conn) = self.conn.take() {
         self.pool.return_writeable(conn);
      }
   }
}

impl fmt::Debug for BorrowedWriteable {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      f.debug_struct("BorrowedWriteable")
         .field("id", &self.conn.as_ref().map(Connection::id))
         .field("path", &self.pool.path())
         .field("transaction_depth", &self.conn.as_ref().map(Connection::transaction_depth))
         .finish()
   }
}
