//! Per-working-directory locks for state-changing pipelines.

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// In-process lock table keyed by working directory.
///
/// Cheap to clone; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceLocks {
    locks: Arc<LockTable>,
}

type LockTable = DashMap<PathBuf, Arc<Mutex<()>>>;

/// Holds a working directory until dropped.
///
/// Releasing the last holder of a directory removes its table entry.
#[derive(Debug)]
pub struct WorkspaceGuard {
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl WorkspaceGuard {
    /// Returns the locked directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Entries still referenced by a waiter survive.
        self.table
            .remove_if(&self.path, |_, mutex| Arc::strong_count(mutex) == 1);
        tracing::debug!(path = %self.path.display(), "Workspace released");
    }
}

fn normalize(dir: &Path) -> PathBuf {
    std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf())
}

async fn normalize_async(dir: &Path) -> PathBuf {
    tokio::fs::canonicalize(dir)
        .await
        .unwrap_or_else(|_| dir.to_path_buf())
}

impl WorkspaceLocks {
    /// Creates an empty lock table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex_for(&self, path: &Path) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(path.to_path_buf()).or_default().value())
    }

    fn guard(&self, path: PathBuf, guard: OwnedMutexGuard<()>) -> WorkspaceGuard {
        WorkspaceGuard {
            path,
            guard: Some(guard),
            table: Arc::clone(&self.locks),
        }
    }

    /// Waits for and takes the lock on `dir`.
    pub async fn acquire(&self, dir: &Path) -> WorkspaceGuard {
        let path = normalize_async(dir).await;
        let mutex = self.mutex_for(&path);
        let guard = match Arc::clone(&mutex).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                tracing::info!(path = %path.display(), "Waiting for workspace lock");
                mutex.lock_owned().await
            }
        };
        tracing::debug!(path = %path.display(), "Workspace locked");
        self.guard(path, guard)
    }

    /// Takes the lock on `dir` if it is free.
    #[must_use]
    pub fn try_acquire(&self, dir: &Path) -> Option<WorkspaceGuard> {
        let path = normalize(dir);
        let mutex = self.mutex_for(&path);
        match mutex.try_lock_owned() {
            Ok(guard) => Some(self.guard(path, guard)),
            Err(_) => {
                self.locks
                    .remove_if(&path, |_, mutex| Arc::strong_count(mutex) == 1);
                None
            }
        }
    }

    /// Returns true if `dir` is currently held.
    #[must_use]
    pub fn is_locked(&self, dir: &Path) -> bool {
        self.locks
            .get(&normalize(dir))
            .is_some_and(|mutex| mutex.try_lock().map(drop).is_err())
    }

    /// Returns the number of directories currently held or waited on.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.locks.len()
    }
}
