//! Account persistence.
//!
//! Implement [`AccountStore`] to keep accounts in your own database. Two
//! implementations ship with the crate: an in-memory store for tests and
//! embedding, and a directory of JSON documents used by the CLI.

use crate::error::{BillsyncError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use super::account::Account;
use super::lock::AccountLocks;

/// Trait for storing accounts.
///
/// `get` returns `Ok(None)` for a missing account; every other failure is an
/// error. Callers serialize access per email through
/// [`AccountLocks`](super::lock::AccountLocks), so implementations only need
/// to make single operations atomic.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Load the account for `email`.
    async fn get(&self, email: &str) -> Result<Option<Account>>;

    /// Insert or replace an account.
    async fn put(&self, account: &Account) -> Result<()>;

    /// Remove an account. Removing a missing account is not an error.
    async fn delete(&self, account: &Account) -> Result<()>;

    /// Emails of every stored account.
    async fn list_emails(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl<T: AccountStore + ?Sized> AccountStore for Arc<T> {
    async fn get(&self, email: &str) -> Result<Option<Account>> {
        (**self).get(email).await
    }

    async fn put(&self, account: &Account) -> Result<()> {
        (**self).put(account).await
    }

    async fn delete(&self, account: &Account) -> Result<()> {
        (**self).delete(account).await
    }

    async fn list_emails(&self) -> Result<Vec<String>> {
        (**self).list_emails().await
    }
}

/// In-memory account store.
#[derive(Clone, Default)]
pub struct InMemoryAccountStore {
    inner: Arc<InMemoryAccountStoreInner>,
}

#[derive(Default)]
struct InMemoryAccountStoreInner {
    accounts: RwLock<HashMap<String, Account>>,
}

impl InMemoryAccountStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored accounts.
    pub fn len(&self) -> usize {
        self.inner
            .accounts
            .read()
            .map(|accounts| accounts.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_error<E>(_: E) -> BillsyncError {
        BillsyncError::storage("account store lock poisoned")
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn get(&self, email: &str) -> Result<Option<Account>> {
        let accounts = self.inner.accounts.read().map_err(Self::lock_error)?;
        Ok(accounts.get(email).cloned())
    }

    async fn put(&self, account: &Account) -> Result<()> {
        let mut accounts = self.inner.accounts.write().map_err(Self::lock_error)?;
        accounts.insert(account.email.clone(), account.clone());
        Ok(())
    }

    async fn delete(&self, account: &Account) -> Result<()> {
        let mut accounts = self.inner.accounts.write().map_err(Self::lock_error)?;
        accounts.remove(&account.email);
        Ok(())
    }

    async fn list_emails(&self) -> Result<Vec<String>> {
        let accounts = self.inner.accounts.read().map_err(Self::lock_error)?;
        let mut emails: Vec<String> = accounts.keys().cloned().collect();
        emails.sort();
        Ok(emails)
    }
}

/// Stores each account as a JSON document under a directory.
///
/// File names are the URL-encoded email plus `.json`. Writes go to a
/// uniquely named temporary file first and are renamed into place.
///
/// Several processes may share a directory. They must lock accounts through
/// [`FileAccountStore::locks`], which takes advisory file locks next to the
/// records.
#[derive(Debug, Clone)]
pub struct FileAccountStore {
    dir: PathBuf,
}

impl FileAccountStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// A lock registry that also excludes other processes using this
    /// directory.
    #[must_use]
    pub fn locks(&self) -> AccountLocks {
        AccountLocks::in_dir(&self.dir)
    }

    fn path_for(&self, email: &str) -> PathBuf {
        self.dir.join(format!("{}.json", urlencoding::encode(email)))
    }
}

#[async_trait]
impl AccountStore for FileAccountStore {
    async fn get(&self, email: &str) -> Result<Option<Account>> {
        let bytes = match tokio::fs::read(self.path_for(email)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let account = serde_json::from_slice(&bytes).map_err(|e| {
            BillsyncError::storage(format!("corrupt account record for {}: {}", email, e))
        })?;
        Ok(Some(account))
    }

    async fn put(&self, account: &Account) -> Result<()> {
        let path = self.path_for(&account.email);
        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(account)
            .map_err(|e| BillsyncError::storage(e.to_string()))?;
        tokio::fs::write(&tmp, bytes).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn delete(&self, account: &Account) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(&account.email)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_emails(&self) -> Result<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut emails = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            match urlencoding::decode(stem) {
                Ok(email) => emails.push(email.into_owned()),
                Err(_) => tracing::warn!(
                    target: "billsync::storage",
                    file = stem,
                    "Skipping account file with undecodable name"
                ),
            }
        }
        emails.sort();
        Ok(emails)
    }
}
