//! Tests for the tokio adapters.
//!
//! Run with: cargo test --features tokio

#![cfg(feature = "tokio")]

use std::sync::Arc;
use std::time::Duration;

use sqlite_conn_pool::{Error, OpenFlags, Pool, PoolConfig};
use tokio::time::timeout;

struct TestPool {
   pool: Arc<Pool>,
   _temp_dir: tempfile::TempDir,
}

async fn setup_pool() -> TestPool {
   let temp_dir = tempfile::tempdir().unwrap();
   let pool = Pool::with_config(
      temp_dir.path().join("async.db"),
      PoolConfig {
         capacity: 3,
         ..Default::default()
      },
   )
   .unwrap();

   let writer = pool.borrow_writeable_async().await.unwrap();
   writer
      .execute_batch("CREATE TABLE events (id INTEGER PRIMARY KEY, kind TEXT)")
      .unwrap();
   drop(writer);

   TestPool {
      pool,
      _temp_dir: temp_dir,
   }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_borrow_async_reads() {
   let test = setup_pool().await;
   let reader = test.pool.borrow_async().await.unwrap();
   let count: i64 = reader
      .query_row("SELECT count(*) FROM events", [], |row| row.get(0))
      .unwrap();
   assert_eq!(count, 0);
   assert!(!reader.is_writeable());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writer_async_waits_for_release() {
   let test = setup_pool().await;
   let held = test.pool.borrow_writeable().unwrap();

   let pool = Arc::clone(&test.pool);
   let waiter = tokio::spawn(async move { pool.borrow_writeable_async().await.map(|w| w.id()) });

   tokio::time::sleep(Duration::from_millis(100)).await;
   assert!(!waiter.is_finished());

   let held_id = held.id();
   drop(held);

   let id = timeout(Duration::from_secs(5), waiter)
      .await
      .expect("writer should be handed over after release")
      .unwrap()
      .unwrap();
   assert_eq!(id, held_id);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_writer_async_on_read_only_pool() {
   let test = setup_pool().await;
   let pool = Pool::new(test.pool.path(), OpenFlags::read_only(), None).unwrap();
   assert!(matches!(
      pool.borrow_writeable_async().await,
      Err(Error::ReadOnlyPool)
   ));
}
