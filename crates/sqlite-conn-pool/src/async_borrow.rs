//! Borrowing from async code
//!
//! [`Pool::borrow`] and [`Pool::borrow_writeable`] block the calling thread.
//! These adapters run them on tokio's blocking thread pool instead, so an
//! async task waiting for a connection never stalls a runtime worker.

use std::sync::Arc;

use crate::{BorrowedConnection, BorrowedWriteable, Error, Pool, Result};

impl Pool {
   /// Async form of [`borrow`](Self::borrow).
   pub async fn borrow_async(self: &Arc<Self>) -> Result<BorrowedConnection> {
      let pool = Arc::clone(self);
      tokio::task::spawn_blocking(move || pool.borrow())
         .await
         .map_err(|e| Error::TaskFailed(e.to_string()))?
   }

   /// Async form of [`borrow_writeable`](Self::borrow_writeable).
   pub async fn borrow_writeable_async(self: &Arc<Self>) -> Result<BorrowedWriteable> {
      // Fail fast without a trip through the blocking pool
      if !self.is_writeable() {
         return Err(Error::ReadOnlyPool);
      }
      let pool = Arc::clone(self);
      tokio::task::spawn_blocking(move || pool.borrow_writeable())
         .await
         .map_err(|e| Error::TaskFailed(e.to_string()))?
   }
}
