//! Per-account mutual exclusion.
//!
//! Every load, decide, persist sequence on an account runs under that
//! account's lock, whether it comes from a request handler, a webhook or the
//! bulk reconciler. Locks for different emails never contend.
//!
//! A registry built with [`AccountLocks::in_dir`] also takes an advisory
//! lock on a file per email, so separate processes sharing an account
//! directory (the server and an operator command) exclude each other too.

use dashmap::DashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{BillsyncError, Result};

/// Registry of per-email locks.
///
/// Cloning shares the registry. Entries are created on first use and kept
/// for the life of the process. The locks are not reentrant: a task holding
/// one must not ask for it again.
#[derive(Clone, Default)]
pub struct AccountLocks {
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    dir: Option<Arc<PathBuf>>,
}

impl AccountLocks {
    /// Locks that only exclude tasks within this process.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks that also hold `<dir>/<email>.lock` while an account is
    /// locked. The directory must exist.
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            locks: Arc::default(),
            dir: Some(Arc::new(dir.into())),
        }
    }

    /// Directory holding the lock files, if any.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref().map(PathBuf::as_path)
    }

    /// Wait for exclusive access to `email`.
    ///
    /// Fails only when the lock file cannot be opened or locked.
    pub async fn lock(&self, email: &str) -> Result<AccountGuard> {
        let mutex = Arc::clone(
            self.locks
                .entry(email.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let guard = mutex.lock_owned().await;

        let file = match &self.dir {
            Some(dir) => Some(lock_file(lock_path(dir, email)).await?),
            None => None,
        };

        Ok(AccountGuard {
            _file: file,
            _guard: guard,
        })
    }

    /// Number of emails that have been locked at least once.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl std::fmt::Debug for AccountLocks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountLocks")
            .field("accounts", &self.locks.len())
            .field("dir", &self.dir)
            .finish()
    }
}

/// Held while an account is being worked on. Dropping it releases the lock.
#[must_use = "the account is unlocked as soon as the guard is dropped"]
pub struct AccountGuard {
    // Closing the file drops the advisory lock; declared first so it goes
    // before the in-process mutex.
    _file: Option<File>,
    _guard: OwnedMutexGuard<()>,
}

fn lock_path(dir: &Path, email: &str) -> PathBuf {
    dir.join(format!("{}.lock", urlencoding::encode(email)))
}

/// Open `path` and block on an exclusive advisory lock, off the runtime.
async fn lock_file(path: PathBuf) -> Result<File> {
    let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)?;
        fs4::fs_std::FileExt::lock_exclusive(&file)?;
        Ok(file)
    })
    .await
    .map_err(|e| BillsyncError::storage(format!("account lock task failed: {}", e)))??;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_email_is_serialized() {
        let locks = AccountLocks::new();
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("a@x").await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[tokio::test]
    async fn test_different_emails_do_not_contend() {
        let locks = AccountLocks::new();
        let _a = locks.lock("a@x").await.unwrap();

        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock("b@x")).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_lock_released_on_drop() {
        let locks = AccountLocks::new();
        {
            let _guard = locks.lock("a@x").await.unwrap();
        }
        let again = tokio::time::timeout(Duration::from_millis(100), locks.lock("a@x")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_lock_released_when_task_panics() {
        let locks = AccountLocks::new();
        let held = locks.clone();
        let result = tokio::spawn(async move {
            let _guard = held.lock("a@x").await.unwrap();
            panic!("boom");
        })
        .await;
        assert!(result.is_err());

        let again = tokio::time::timeout(Duration::from_millis(100), locks.lock("a@x")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_lock_dir_excludes_other_registries() {
        let dir = tempfile::tempdir().unwrap();
        // Two registries on one directory stand in for two processes.
        let server = AccountLocks::in_dir(dir.path());
        let operator = AccountLocks::in_dir(dir.path());

        let held = server.lock("a+b@x").await.unwrap();
        assert!(dir.path().join("a%2Bb%40x.lock").exists());

        let blocked =
            tokio::time::timeout(Duration::from_millis(200), operator.lock("a+b@x")).await;
        assert!(blocked.is_err());

        let other = tokio::time::timeout(Duration::from_millis(200), operator.lock("c@x")).await;
        assert!(other.unwrap().is_ok());

        drop(held);
        let acquired =
            tokio::time::timeout(Duration::from_secs(5), operator.lock("a+b@x")).await;
        assert!(acquired.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_lock_dir_missing_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let locks = AccountLocks::in_dir(dir.path().join("missing"));

        let err = locks.lock("a@x").await.err().unwrap();
        assert!(matches!(err, BillsyncError::Storage(_)));

        // The in-process mutex was released with the failed attempt.
        let retry = tokio::time::timeout(Duration::from_millis(200), locks.lock("a@x")).await;
        assert!(retry.is_ok());
    }

    #[test]
    fn test_default_has_no_lock_dir() {
        assert!(AccountLocks::new().dir().is_none());
        assert!(AccountLocks::in_dir("/tmp/x").dir().is_some());
    }
}
