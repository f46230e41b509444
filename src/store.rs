//! Object store gateway.
//!
//! Archive artifacts live under `<account>/<file>` keys in some object store.
//! [`ObjectStore`] is the backend seam (filesystem, HTTP, in-memory);
//! [`Gateway`] sits in front of it and adds per-key request coalescing plus
//! separate memo tables for byte blobs and account existence.
//!
//! A missing object is `Ok(None)`, never an error.

use crate::error::{LensError, Result};
use crate::memo::Memo;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Build the store key for one artifact of one account.
#[must_use]
pub fn artifact_key(account: &str, file: &str) -> String {
    format!("{}/{}", account.trim_matches('/'), file)
}

/// Backend that serves raw artifact bytes.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch the object at `key`. `Ok(None)` means it does not exist.
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>>;

    /// Whether any artifacts exist for `account`.
    async fn exists(&self, account: &str) -> Result<bool>;

    /// Account prefixes known to the store. Backends that cannot enumerate
    /// return an empty list.
    async fn list_accounts(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

// =============================================================================
// Filesystem backend
// =============================================================================

/// Artifacts laid out as `<root>/<account>/<file>`.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || key.is_empty() {
            return Err(LensError::store(key, "key must be a relative path"));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        let path = self.resolve(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LensError::store(key, e.to_string())),
        }
    }

    async fn exists(&self, account: &str) -> Result<bool> {
        let path = self.resolve(account.trim_matches('/'))?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(LensError::store(account, e.to_string())),
        }
    }

    async fn list_accounts(&self) -> Result<Vec<String>> {
        let mut accounts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(accounts),
            Err(e) => return Err(LensError::store(self.root.display().to_string(), e.to_string())),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                accounts.push(name);
            }
        }
        accounts.sort();
        Ok(accounts)
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }
}

// =============================================================================
// HTTP backend
// =============================================================================

/// Artifacts served at `<base_url>/<account>/<file>` (e.g. a public bucket).
pub struct HttpStore {
    client: reqwest::Client,
    base_url: String,
    marker: String,
}

impl HttpStore {
    /// `marker` is the artifact whose presence proves an account exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, marker: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            marker: marker.into(),
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        let response = self.client.get(self.url(key)).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            // Buckets without list permission answer 403 for absent keys.
            return Ok(None);
        }
        if !status.is_success() {
            return Err(LensError::store(key, format!("HTTP {status}")));
        }
        Ok(Some(response.bytes().await?))
    }

    async fn exists(&self, account: &str) -> Result<bool> {
        let key = artifact_key(account, &self.marker);
        let response = self.client.head(self.url(&key)).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Ok(false);
        }
        Err(LensError::store(key, format!("HTTP {status}")))
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }
}

// =============================================================================
// In-memory backend
// =============================================================================

/// In-process store. Counts fetches and can delay them, which makes request
/// coalescing observable.
#[derive(Default)]
pub struct MemoryStore {
    objects: RwLock<HashMap<String, Bytes>>,
    fetches: AtomicUsize,
    delay: Option<Duration>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps for `delay` before answering.
    #[must_use]
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().insert(key.into(), data.into());
    }

    pub fn remove(&self, key: &str) {
        self.objects.write().remove(key);
    }

    /// Number of `fetch` calls that reached this backend.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn fetch(&self, key: &str) -> Result<Option<Bytes>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.objects.read().get(key).cloned())
    }

    async fn exists(&self, account: &str) -> Result<bool> {
        let prefix = format!("{}/", account.trim_matches('/'));
        Ok(self.objects.read().keys().any(|k| k.starts_with(&prefix)))
    }

    async fn list_accounts(&self) -> Result<Vec<String>> {
        let accounts: BTreeSet<String> = self
            .objects
            .read()
            .keys()
            .filter_map(|k| k.split_once('/').map(|(account, _)| account.to_string()))
            .filter(|account| !account.starts_with('.'))
            .collect();
        Ok(accounts.into_iter().collect())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// =============================================================================
// Gateway
// =============================================================================

/// Memoizing, coalescing front for an [`ObjectStore`].
pub struct Gateway {
    store: Arc<dyn ObjectStore>,
    blobs: Memo<String, Option<Bytes>>,
    existence: Memo<String, bool>,
}

/// Blobs kept resident by [`Gateway::new`].
pub const DEFAULT_CACHED_BLOBS: usize = 64;

impl Gateway {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_capacity(store, DEFAULT_CACHED_BLOBS)
    }

    /// Gateway that keeps at most `cached_blobs` fetched artifacts.
    pub fn with_capacity(store: Arc<dyn ObjectStore>, cached_blobs: usize) -> Self {
        Self {
            store,
            // Absent objects are not cached so a later upload is picked up.
            blobs: Memo::retain_if("blobs", Option::is_some).with_capacity(cached_blobs),
            existence: Memo::retain_if("existence", |found| *found),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Fetch bytes for `key`, sharing one in-flight request per key.
    ///
    /// # Errors
    ///
    /// Returns any store failure other than not-found.
    pub async fn fetch_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        let store = Arc::clone(&self.store);
        let owned = key.to_string();
        self.blobs
            .get_or_try_insert_with(key.to_string(), move || async move {
                debug!(key = %owned, "Fetching artifact");
                store.fetch(&owned).await
            })
            .await
    }

    /// Fetch one artifact of one account.
    ///
    /// # Errors
    ///
    /// Returns any store failure other than not-found.
    pub async fn fetch_artifact(&self, account: &str, file: &str) -> Result<Option<Bytes>> {
        self.fetch_bytes(&artifact_key(account, file)).await
    }

    /// Drop the cached bytes of one artifact so the next fetch goes back to
    /// the store.
    pub fn forget_artifact(&self, account: &str, file: &str) {
        self.blobs.invalidate(&artifact_key(account, file));
    }

    /// Fetch and parse an optional JSON companion file. A file that exists
    /// but does not parse is logged and treated as absent.
    ///
    /// # Errors
    ///
    /// Returns store failures other than not-found.
    pub async fn fetch_companion_json(
        &self,
        account: &str,
        file: &str,
    ) -> Result<Option<serde_json::Value>> {
        let Some(data) = self.fetch_artifact(account, file).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&data) {
            Ok(value) => Ok(Some(value)),
            Err(source) => {
                let err = LensError::json(file, source);
                warn!(account = %account, error = %err, "Ignoring unreadable companion file");
                Ok(None)
            }
        }
    }

    /// Whether the account has any artifacts.
    ///
    /// # Errors
    ///
    /// Returns any store failure.
    pub async fn exists(&self, account: &str) -> Result<bool> {
        let store = Arc::clone(&self.store);
        let owned = account.to_string();
        self.existence
            .get_or_try_insert_with(account.to_string(), move || async move {
                store.exists(&owned).await
            })
            .await
    }

    /// Accounts the backend can enumerate.
    ///
    /// # Errors
    ///
    /// Returns any store failure.
    pub async fn list_accounts(&self) -> Result<Vec<String>> {
        self.store.list_accounts().await
    }
}
