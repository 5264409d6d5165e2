//! File-backed record store.
//!
//! Layout under the store root:
//!
//! - `identities/<aa>/<pubkey>.json` – one identity record per pubkey
//! - `accounts/<sha256(account_id)>.json` – one account record per account
//! - `index/by-account/<sha256(account_id)>.txt` – pubkeys ever linked to an account
//! - `journal/pending.json` – writes of the commit in progress
//! - `lock` – held by the process running a transaction
//!
//! Records are replaced atomically via temp file + rename. A commit first
//! persists its full write set to the journal, applies it, then removes the
//! journal; an interrupted commit is rolled forward by the next transaction.

use std::{
    collections::HashSet,
    fs,
    io::{ErrorKind, Write as _},
    path::{Path, PathBuf},
    time::{Duration, Instant, SystemTime},
};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};

use super::{IdentityFilter, Order, RecordStore, StoreError, Transaction, Write};
use crate::model::{Account, IdentityLink};

/// How long to wait for a concurrent transaction to release the lock.
const LOCK_WAIT: Duration = Duration::from_secs(3);
/// Locks older than this belong to a crashed holder and are broken.
const LOCK_STALE: Duration = Duration::from_secs(30);
const LOCK_RETRY: Duration = Duration::from_millis(5);

/// Persistent store rooted at `root`.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Ensure the directory structure exists and finish any interrupted commit.
    pub fn init(&self) -> Result<(), StoreError> {
        for d in ["identities", "accounts", "index/by-account", "journal"] {
            fs::create_dir_all(self.root.join(d))?;
        }
        if !self.lock_path().exists() {
            self.recover()?;
        }
        Ok(())
    }

    /// Rebuild the by-account index from the identity records.
    pub fn reindex(&self) -> Result<usize, StoreError> {
        let index_dir = self.root.join("index");
        if index_dir.exists() {
            fs::remove_dir_all(&index_dir)?;
        }
        fs::create_dir_all(self.root.join("index/by-account"))?;
        let links = self.scan_identities()?;
        for link in &links {
            self.append_index(&link.account_id, &link.pubkey)?;
        }
        Ok(links.len())
    }

    /// Canonical path for an identity record; `None` for keys that are not hex.
    fn identity_path(&self, pubkey: &str) -> Option<PathBuf> {
        if pubkey.len() < 2 || !pubkey.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(
            self.root
                .join("identities")
                .join(&pubkey[0..2])
                .join(format!("{}.json", pubkey)),
        )
    }

    fn account_path(&self, account_id: &str) -> PathBuf {
        self.root
            .join("accounts")
            .join(format!("{}.json", account_key(account_id)))
    }

    fn index_path(&self, account_id: &str) -> PathBuf {
        self.root
            .join("index/by-account")
            .join(format!("{}.txt", account_key(account_id)))
    }

    fn journal_path(&self) -> PathBuf {
        self.root.join("journal/pending.json")
    }

    fn lock_path(&self) -> PathBuf {
        self.root.join("lock")
    }

    fn read_identity(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        match self.identity_path(pubkey) {
            Some(path) => read_json(&path),
            None => Ok(None),
        }
    }

    fn read_account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        read_json(&self.account_path(account_id))
    }

    /// Append `pubkey` to the account's index unless already listed.
    fn append_index(&self, account_id: &str, pubkey: &str) -> Result<(), StoreError> {
        let path = self.index_path(account_id);
        if read_lines(&path)?.contains(pubkey) {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        writeln!(f, "{}", pubkey)?;
        Ok(())
    }

    /// Load every identity record under `identities/`.
    fn scan_identities(&self) -> Result<Vec<IdentityLink>, StoreError> {
        let dir = self.root.join("identities");
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut links = vec![];
        for entry in walkdir::WalkDir::new(dir) {
            let entry = entry.map_err(|e| StoreError::Io(e.into()))?;
            let is_record = entry.file_type().is_file()
                && entry.path().extension().map_or(false, |ext| ext == "json");
            if is_record {
                if let Some(link) = read_json(entry.path())? {
                    links.push(link);
                }
            }
        }
        Ok(links)
    }

    /// Apply a write set record by record.
    fn apply(&self, writes: &[Write]) -> Result<(), StoreError> {
        for w in writes {
            match w {
                Write::Identity(link) => {
                    let path = self
                        .identity_path(&link.pubkey)
                        .ok_or_else(|| StoreError::InvalidKey(link.pubkey.clone()))?;
                    write_json(&path, link)?;
                    self.append_index(&link.account_id, &link.pubkey)?;
                }
                Write::Account(acct) => {
                    write_json(&self.account_path(&acct.account_id), acct)?;
                }
            }
        }
        Ok(())
    }

    /// Roll forward a journaled commit left behind by an interrupted writer.
    fn recover(&self) -> Result<(), StoreError> {
        let journal = self.journal_path();
        if let Some(writes) = read_json::<Vec<Write>>(&journal)? {
            tracing::warn!(writes = writes.len(), "replaying interrupted commit");
            self.apply(&writes)?;
            fs::remove_file(journal)?;
        }
        Ok(())
    }

    async fn acquire_lock(&self) -> Result<LockGuard, StoreError> {
        let path = self.lock_path();
        let started = Instant::now();
        loop {
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
            {
                Ok(mut f) => {
                    let _ = writeln!(f, "{}", std::process::id());
                    return Ok(LockGuard { path });
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if lock_is_stale(&path) {
                        tracing::warn!(path = %path.display(), "breaking stale store lock");
                        let _ = fs::remove_file(&path);
                        continue;
                    }
                    if started.elapsed() >= LOCK_WAIT {
                        return Err(StoreError::Busy(path.display().to_string()));
                    }
                    tokio::time::sleep(LOCK_RETRY).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn indexed_identities(
        &self,
        filter: &IdentityFilter,
    ) -> Result<Vec<IdentityLink>, StoreError> {
        let account_id = filter
            .account_id
            .as_deref()
            .ok_or(StoreError::MissingIndex("identities by linked_at without account"))?;
        if !self.root.join("index/by-account").exists() {
            return Err(StoreError::MissingIndex("by-account"));
        }
        let mut links = vec![];
        for pubkey in read_lines(&self.index_path(account_id))? {
            if let Some(link) = self.read_identity(&pubkey)? {
                if filter.matches(&link) {
                    links.push(link);
                }
            }
        }
        links.sort_by_key(|l| l.linked_at);
        Ok(links)
    }
}

#[async_trait]
impl RecordStore for FileStore {
    async fn query_identities(
        &self,
        filter: &IdentityFilter,
        order: Option<Order>,
        limit: Option<usize>,
    ) -> Result<Vec<IdentityLink>, StoreError> {
        let mut links = if let Some(pubkey) = &filter.pubkey {
            self.read_identity(pubkey)?
                .into_iter()
                .filter(|l| filter.matches(l))
                .collect()
        } else if order.is_some() {
            self.indexed_identities(filter)?
        } else {
            let mut all = self.scan_identities()?;
            all.retain(|l| filter.matches(l));
            all
        };
        if let Some(limit) = limit {
            links.truncate(limit);
        }
        Ok(links)
    }

    async fn identity(&self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        self.read_identity(pubkey)
    }

    async fn account(&self, account_id: &str) -> Result<Option<Account>, StoreError> {
        self.read_account(account_id)
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        let lock = self.acquire_lock().await?;
        self.recover()?;
        Ok(Box::new(FileTransaction {
            store: self.clone(),
            _lock: lock,
        }))
    }
}

struct FileTransaction {
    store: FileStore,
    _lock: LockGuard,
}

#[async_trait]
impl Transaction for FileTransaction {
    async fn identity(&mut self, pubkey: &str) -> Result<Option<IdentityLink>, StoreError> {
        self.store.read_identity(pubkey)
    }

    async fn account(&mut self, account_id: &str) -> Result<Option<Account>, StoreError> {
        self.store.read_account(account_id)
    }

    async fn commit(self: Box<Self>, writes: Vec<Write>) -> Result<(), StoreError> {
        if writes.is_empty() {
            return Ok(());
        }
        for w in &writes {
            if let Write::Identity(link) = w {
                if self.store.identity_path(&link.pubkey).is_none() {
                    return Err(StoreError::InvalidKey(link.pubkey.clone()));
                }
            }
        }
        let journal = self.store.journal_path();
        write_json(&journal, &writes)?;
        self.store.apply(&writes)?;
        fs::remove_file(journal)?;
        Ok(())
    }
}

/// Removes the lock file when the transaction ends.
struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(path: &Path) -> bool {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .map_or(false, |age| age > LOCK_STALE)
}

/// Read a JSON record, treating a missing file as `None`.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Atomically replace `path` with the JSON encoding of `value`.
/// Fixed-length file name for an account id of any length. The raw id is
/// kept inside the records.
fn account_key(account_id: &str) -> String {
    hex::encode(Sha256::digest(account_id.as_bytes()))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StoreError> {
    let parent_dir = path
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));
    fs::create_dir_all(&parent_dir)?;
    let tmp = tempfile::NamedTempFile::new_in(&parent_dir)?;
    serde_json::to_writer(&tmp, value)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Read newline-separated entries from a text file.
fn read_lines(path: &Path) -> Result<HashSet<String>, StoreError> {
    match fs::read_to_string(path) {
        Ok(data) => Ok(data
            .lines()
            .filter(|l| !l.is_empty())
            .map(|s| s.to_string())
            .collect()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Default::default()),
        Err(e) => Err(e.into()),
    }
}
