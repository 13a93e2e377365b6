//! Tests for `Transaction` guards and `execute_transaction`.

use std::sync::Arc;

use sqlite_pool::{Error, Pool, PoolConfig, Transaction, execute_transaction};

struct TestDb {
   pool: Arc<Pool>,
   _temp_dir: tempfile::TempDir,
}

fn create_test_db() -> TestDb {
   let _ = tracing_subscriber::fmt()
      .with_max_level(tracing::Level::DEBUG)
      .with_test_writer()
      .try_init();

   let temp_dir = tempfile::tempdir().unwrap();
   let pool = Pool::with_config(temp_dir.path().join("tx.db"), PoolConfig::default()).unwrap();
   let writer = pool.borrow_writeable().unwrap();
   writer
      .execute_batch(
         "CREATE TABLE accounts (id INTEGER PRIMARY KEY, balance INTEGER NOT NULL);
          INSERT INTO accounts (id, balance) VALUES (1, 100), (2, 50);",
      )
      .unwrap();
   drop(writer);

   TestDb {
      pool,
      _temp_dir: temp_dir,
   }
}

fn balances(pool: &Arc<Pool>) -> Vec<i64> {
   let reader = pool.borrow().unwrap();
   let mut stmt = reader
      .prepare("SELECT balance FROM accounts ORDER BY id")
      .unwrap();
   let rows = stmt
      .query_map([], |row| row.get(0))
      .unwrap()
      .collect::<Result<Vec<i64>, _>>()
      .unwrap();
   rows
}

fn transfer(tx: &Transaction<'_>, amount: i64) -> sqlite_pool::Result<()> {
   tx.execute("UPDATE accounts SET balance = balance - ?1 WHERE id = 1", [amount])?;
   tx.execute("UPDATE accounts SET balance = balance + ?1 WHERE id = 2", [amount])?;
   Ok(())
}

// ============================================================================
// execute_transaction
// ============================================================================

#[test]
fn test_execute_transaction_commits() {
   let db = create_test_db();
   let moved = execute_transaction(&db.pool, |tx| {
      transfer(tx, 30)?;
      Ok(30)
   })
   .unwrap();

   assert_eq!(moved, 30);
   assert_eq!(balances(&db.pool), vec![70, 80]);
}

#[test]
fn test_execute_transaction_rolls_back_on_error() {
   let db = create_test_db();
   let result: sqlite_pool::Result<()> = execute_transaction(&db.pool, |tx| {
      transfer(tx, 30)?;
      // NULL violates NOT NULL
      tx.execute("INSERT INTO accounts (id, balance) VALUES (3, NULL)", [])?;
      Ok(())
   });

   let err = result.unwrap_err();
   assert!(matches!(err, Error::Sqlite(_)));
   assert!(err.error_code().starts_with("SQLITE_"));
   assert_eq!(balances(&db.pool), vec![100, 50]);
}

#[test]
fn test_execute_transaction_returns_callback_error() {
   let db = create_test_db();
   let result: sqlite_pool::Result<()> = execute_transaction(&db.pool, |tx| {
      transfer(tx, 500)?;
      Err(Error::Other("insufficient funds".into()))
   });

   assert!(matches!(result, Err(Error::Other(msg)) if msg == "insufficient funds"));
   assert_eq!(balances(&db.pool), vec![100, 50]);
}

#[test]
fn test_execute_transaction_returns_writer_to_pool() {
   let db = create_test_db();
   let _ = execute_transaction(&db.pool, |tx| transfer(tx, 10));
   let _: sqlite_pool::Result<()> =
      execute_transaction(&db.pool, |_| Err(Error::Other("fail".into())));

   let writer = db.pool.try_borrow_writeable().unwrap().unwrap();
   assert!(!writer.in_transaction());
   assert_eq!(writer.transaction_depth(), 0);
}

#[test]
fn test_execute_transaction_on_read_only_pool() {
   let db = create_test_db();
   let pool = Pool::new(db.pool.path(), sqlite_pool::OpenFlags::read_only(), None).unwrap();
   let err = execute_transaction(&pool, |_| Ok(())).unwrap_err();
   assert_eq!(err.error_code(), "READ_ONLY_POOL");
}

#[test]
fn test_execute_transaction_with_nested_savepoint() {
   let db = create_test_db();
   execute_transaction(&db.pool, |tx| {
      transfer(tx, 10)?;

      let inner = tx.savepoint()?;
      assert_eq!(inner.depth(), 2);
      transfer(&inner, 1000)?;
      inner.rollback()?;

      Ok(())
   })
   .unwrap();

   assert_eq!(balances(&db.pool), vec![90, 60]);
}

#[test]
fn test_execute_transaction_ended_by_callback() {
   let db = create_test_db();
   let result: sqlite_pool::Result<()> = execute_transaction(&db.pool, |tx| {
      tx.end_transaction(true)?;
      Ok(())
   });

   assert!(matches!(result, Err(Error::TransactionAlreadyFinalized)));
   assert_eq!(
      result.unwrap_err().error_code(),
      "TRANSACTION_ALREADY_FINALIZED"
   );
}

// ============================================================================
// Transaction guard
// ============================================================================

#[test]
fn test_guard_commit() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   let tx = Transaction::begin(&mut writer).unwrap();
   assert_eq!(tx.depth(), 1);
   transfer(&tx, 25).unwrap();
   tx.commit().unwrap();

   assert!(!writer.in_transaction());
   drop(writer);
   assert_eq!(balances(&db.pool), vec![75, 75]);
}

#[test]
fn test_guard_rolls_back_on_drop() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   {
      let tx = Transaction::begin_deferred(&mut writer).unwrap();
      transfer(&tx, 25).unwrap();
   }

   assert_eq!(writer.transaction_depth(), 0);
   assert!(!writer.in_transaction());
   drop(writer);
   assert_eq!(balances(&db.pool), vec![100, 50]);
}

#[test]
fn test_guard_explicit_rollback() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   let tx = Transaction::begin(&mut writer).unwrap();
   transfer(&tx, 25).unwrap();
   tx.rollback().unwrap();

   drop(writer);
   assert_eq!(balances(&db.pool), vec![100, 50]);
}

#[test]
fn test_nested_guards() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   let mut outer = Transaction::begin(&mut writer).unwrap();
   transfer(&outer, 10).unwrap();
   {
      let inner = Transaction::begin(&mut outer).unwrap();
      assert_eq!(inner.depth(), 2);
      transfer(&inner, 10).unwrap();
      inner.commit().unwrap();
   }
   {
      // Dropped without commit
      let inner = outer.savepoint().unwrap();
      transfer(&inner, 1000).unwrap();
   }
   outer.commit().unwrap();

   drop(writer);
   assert_eq!(balances(&db.pool), vec![80, 70]);
}

#[test]
fn test_nested_commit_undone_by_outer_rollback() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   let mut outer = Transaction::begin(&mut writer).unwrap();
   let inner = outer.savepoint().unwrap();
   transfer(&inner, 10).unwrap();
   inner.commit().unwrap();
   outer.rollback().unwrap();

   drop(writer);
   assert_eq!(balances(&db.pool), vec![100, 50]);
}

#[test]
fn test_begin_inside_foreign_transaction() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();
   writer.execute_batch("BEGIN").unwrap();

   let err = Transaction::begin(&mut writer).unwrap_err();
   assert_eq!(err.error_code(), "TRANSACTION_ALREADY_ACTIVE");

   writer.execute_batch("ROLLBACK").unwrap();
}

#[test]
fn test_readers_do_not_see_uncommitted_changes() {
   let db = create_test_db();
   let mut writer = db.pool.borrow_writeable().unwrap();

   let tx = Transaction::begin(&mut writer).unwrap();
   transfer(&tx, 40).unwrap();
   assert_eq!(balances(&db.pool), vec![100, 50]);

   tx.commit().unwrap();
   assert_eq!(balances(&db.pool), vec![60, 90]);
}
