//! Identity cache and storage engine.
//!
//! [`Storage`] owns the canonical in-memory accounts and characters and
//! mediates every read and write against the [`QueryExecutor`]:
//! - accounts and their characters (`accounts`, `characters`)
//! - guilds and guild membership (`guilds`)
//! - persisted public chat channels (`channels`)
//!
//! # Concurrency
//!
//! Cached entities are `Arc<RwLock<_>>` handles in `DashMap`s keyed by
//! primary key, with name → ID indexes beside them. Cache hits never touch
//! the executor.
//!
//! The executor is one connection behind an async mutex. Loads re-check the
//! cache after acquiring it, so concurrent lookups for the same key resolve
//! to the instance registered by whichever caller got the connection first.
//! No DashMap guard is held across an `.await`.
//!
//! Entity locks are always taken before the executor lock, never after.

mod accounts;
mod channels;
mod characters;
pub mod executor;
mod guilds;
pub mod reconcile;
pub mod schema;

pub use executor::{QueryExecutor, Row, SqlValue, SqliteExecutor};
pub use reconcile::{Reconciliation, SyncReport, reconcile};

use crate::config::StorageLimits;
use crate::error::StorageError;
use crate::state::{AccountRef, CharacterRef};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

/// Executor trait object as stored by the engine.
pub(crate) type DynExecutor = dyn QueryExecutor;

/// The storage engine.
pub struct Storage {
    executor: Mutex<Box<DynExecutor>>,
    accounts: DashMap<i64, AccountRef>,
    account_names: DashMap<String, i64>,
    characters: DashMap<i64, CharacterRef>,
    character_names: DashMap<String, i64>,
    limits: StorageLimits,
    closed: AtomicBool,
}

impl Storage {
    /// Take ownership of `executor` and create any missing tables.
    ///
    /// A failure here means the store is unusable; callers should abort
    /// startup.
    pub async fn open<E>(mut executor: E, limits: StorageLimits) -> Result<Self, StorageError>
    where
        E: QueryExecutor + 'static,
    {
        for (table, sql) in schema::TABLES {
            executor.execute(sql, &[]).await.map_err(|e| {
                tracing::error!(table = %table, error = %e, "Failed to create table");
                e
            })?;
        }
        for sql in schema::INDEXES {
            executor.execute(sql, &[]).await?;
        }
        info!("Database tables checked/created");

        Ok(Self {
            executor: Mutex::new(Box::new(executor)),
            accounts: DashMap::new(),
            account_names: DashMap::new(),
            characters: DashMap::new(),
            character_names: DashMap::new(),
            limits,
            closed: AtomicBool::new(false),
        })
    }

    /// Connect to the SQLite database at `path` and open it.
    pub async fn open_sqlite(path: &str, limits: StorageLimits) -> Result<Self, StorageError> {
        let executor = SqliteExecutor::connect(path).await?;
        Self::open(executor, limits).await
    }

    /// Release the connection and drop every cached entity.
    ///
    /// Handles already given out stay readable, but nothing more reaches the
    /// store; pending changes must be flushed first.
    pub async fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut exec = self.executor.lock().await;
        exec.close().await?;
        self.accounts.clear();
        self.account_names.clear();
        self.characters.clear();
        self.character_names.clear();
        info!("Storage closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn limits(&self) -> &StorageLimits {
        &self.limits
    }

    /// Number of accounts currently in the identity cache.
    pub fn cached_accounts(&self) -> usize {
        self.accounts.len()
    }

    /// Number of characters currently in the identity cache.
    pub fn cached_characters(&self) -> usize {
        self.characters.len()
    }

    /// Acquire the executor for a sequence of statements.
    async fn executor(&self) -> Result<MutexGuard<'_, Box<DynExecutor>>, StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        let guard = self.executor.lock().await;
        // close() may have won the race for the lock
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(guard)
    }
}

/// Commit on success, roll back on failure.
///
/// The executor exposes a transaction boundary, so multi-statement writes
/// (an account with its characters, a guild with its members) either land
/// completely or not at all.
async fn finish<T>(
    exec: &mut DynExecutor,
    result: Result<T, StorageError>,
) -> Result<T, StorageError> {
    match result {
        Ok(value) => {
            exec.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = exec.rollback().await {
                warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::executor::testing::CountingExecutor;

    #[tokio::test]
    async fn open_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let path = path.to_str().unwrap();

        let storage = Storage::open_sqlite(path, StorageLimits::default())
            .await
            .unwrap();
        storage.close().await.unwrap();

        let storage = Storage::open_sqlite(path, StorageLimits::default())
            .await
            .unwrap();
        assert_eq!(storage.get_email_list().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn closed_storage_rejects_operations() {
        let (exec, _) = CountingExecutor::in_memory().await;
        let storage = Storage::open(exec, StorageLimits::default()).await.unwrap();
        storage.close().await.unwrap();
        assert!(storage.is_closed());
        assert!(matches!(
            storage.get_account("alice").await,
            Err(StorageError::Closed)
        ));
        // closing twice is harmless
        storage.close().await.unwrap();
    }
}
