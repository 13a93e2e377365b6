//! One pool per database file, looked up by path

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use sqlite_conn_pool::{Pool, PoolConfig, delete_database_files};
use tracing::debug;

use crate::{Error, Result};

/// Pools managed by the application, keyed by absolute database path.
///
/// Opening two pools on the same file would give it two writers, so every
/// caller should go through a shared registry instead of creating pools
/// directly.
#[derive(Default)]
pub struct PoolRegistry {
   pools: RwLock<HashMap<PathBuf, Arc<Pool>>>,
}

impl PoolRegistry {
   pub fn new() -> Self {
      Self::default()
   }

   /// Returns the pool for `path`, creating it if needed.
   ///
   /// `config` only applies when the pool is created; an already loaded pool
   /// is returned unchanged. Defaults to [`PoolConfig::default`].
   pub fn load(&self, path: impl AsRef<Path>, config: Option<PoolConfig>) -> Result<Arc<Pool>> {
      let path = path.as_ref();
      let key = registry_key(path)?;

      if let Some(pool) = self.pools.read().get(&key) {
         return Ok(Arc::clone(pool));
      }

      let mut pools = self.pools.write();
      // Another thread may have loaded it between the two locks
      if let Some(pool) = pools.get(&key) {
         return Ok(Arc::clone(pool));
      }

      let pool = Pool::with_config(path, config.unwrap_or_default())?;
      debug!(path = %key.display(), capacity = pool.capacity(), "Loaded database pool");
      pools.insert(key, Arc::clone(&pool));
      Ok(pool)
   }

   /// Returns the pool loaded for `path`.
   pub fn get(&self, path: impl AsRef<Path>) -> Result<Arc<Pool>> {
      let path = path.as_ref();
      let key = registry_key(path)?;
      self
         .pools
         .read()
         .get(&key)
         .cloned()
         .ok_or_else(|| Error::DatabaseNotLoaded(path.display().to_string()))
   }

   /// Paths of all loaded pools, in no particular order.
   pub fn paths(&self) -> Vec<PathBuf> {
      self.pools.read().keys().cloned().collect()
   }

   /// Unloads the pool for `path` and closes its connections, waiting for
   /// borrowed ones to be returned.
   ///
   /// Callers still holding the `Arc<Pool>` can keep using it; it just
   /// reopens connections on demand.
   pub fn close(&self, path: impl AsRef<Path>) -> Result<()> {
      let pool = self.unload(path.as_ref())?;
      pool.close_all();
      debug!(path = %pool.path().display(), "Closed database pool");
      Ok(())
   }

   /// Unloads and closes every pool.
   pub fn close_all(&self) {
      let pools: Vec<_> = self.pools.write().drain().map(|(_, pool)| pool).collect();
      debug!(count = pools.len(), "Closing all database pools");
      for pool in pools {
         pool.close_all();
      }
   }

   /// Closes the pool for `path` and deletes the database file along with
   /// its `-wal` and `-shm` files.
   pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
      let pool = self.unload(path.as_ref())?;
      pool.close_all();
      delete_database_files(pool.path())?;
      debug!(path = %pool.path().display(), "Removed database");
      Ok(())
   }

   fn unload(&self, path: &Path) -> Result<Arc<Pool>> {
      let key = registry_key(path)?;
      self
         .pools
         .write()
         .remove(&key)
         .ok_or_else(|| Error::DatabaseNotLoaded(path.display().to_string()))
   }
}

impl std::fmt::Debug for PoolRegistry {
   fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("PoolRegistry")
         .field("paths", &self.paths())
         .finish()
   }
}

/// Builds the key a database file is registered under, so every spelling of
/// one file (relative, through `..`, through a symlinked directory) maps to
/// the same pool.
///
/// The file itself may not exist yet, so only its directory is
/// canonicalized. A missing directory falls back to lexical normalization.
fn registry_key(path: &Path) -> Result<PathBuf> {
   if path.as_os_str().is_empty() {
      return Err(sqlite_conn_pool::Error::EmptyPath.into());
   }

   let absolute = std::path::absolute(path)?;
   if let (Some(dir), Some(name)) = (absolute.parent(), absolute.file_name()) {
      match std::fs::canonicalize(dir) {
         Ok(dir) => return Ok(dir.join(name)),
         Err(e) if e.kind() == ErrorKind::NotFound => {}
         Err(e) => return Err(e.into()),
      }
   }
   Ok(normalize_lexically(&absolute))
}

/// Drops `.` and resolves `..` against the preceding component.
fn normalize_lexically(path: &Path) -> PathBuf {
   let mut normalized = PathBuf::new();
   for component in path.components() {
      match component {
         Component::CurDir => {}
         Component::ParentDir => {
            normalized.pop();
         }
         other => normalized.push(other),
      }
   }
   normalized
}
