//! Persistent merge cache: durable per-resource records merged with fresh
//! fetches, then normalized into the fact store.
//!
//! The durable medium sits behind [`KvStore`]. If it cannot be opened, or a
//! later read or write fails, the cache keeps answering from an in-memory
//! mirror and flags itself degraded instead of failing the caller. A key
//! whose durable record could not be read is merged in memory only from then
//! on, so a partial merge never replaces what the medium already holds.

pub mod memory;
pub mod merge;
pub mod sqlite;
pub mod traits;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::facts::{Fact, FactStore};
use crate::normalize;
use crate::types::{Comment, FullUser, Issue, IssueLocator, Notification};

pub use memory::MemoryKv;
pub use merge::{Keyed, merge_by_id, merge_fields, merge_record};
pub use sqlite::SqliteKv;
pub use traits::{KvStore, StoreName};

/// The notifications resource has exactly one key.
pub const NOTIFICATIONS_KEY: &str = "notifications";

/// Per-resource durable cache feeding the fact store.
#[derive(Debug)]
pub struct MergeCache {
    kv: Arc<dyn KvStore>,
    /// Write-through copy of everything merged this process.
    mirror: MemoryKv,
    facts: Arc<FactStore>,
    degraded: AtomicBool,
    locks: std::sync::Mutex<HashMap<(StoreName, String), Arc<tokio::sync::Mutex<()>>>>,
    /// Keys whose durable record could not be read; never written back.
    memory_only: std::sync::Mutex<HashSet<(StoreName, String)>>,
}

/// Outcome of reading one key.
enum Stored {
    Found(serde_json::Value),
    Absent,
    /// The medium failed; the key is now memory-only.
    Unavailable,
}

/// Holds the per-key merge lock and prunes the table entry once no other
/// merge for the key is waiting.
struct KeyGuard<'a> {
    locks: &'a std::sync::Mutex<HashMap<(StoreName, String), Arc<tokio::sync::Mutex<()>>>>,
    slot: (StoreName, String),
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if locks
            .get(&self.slot)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.slot);
        }
    }
}

impl MergeCache {
    pub fn new(kv: Arc<dyn KvStore>, facts: Arc<FactStore>) -> Self {
        Self {
            kv,
            mirror: MemoryKv::new(),
            facts,
            degraded: AtomicBool::new(false),
            locks: std::sync::Mutex::new(HashMap::new()),
            memory_only: std::sync::Mutex::new(HashSet::new()),
        }
    }

    /// Open the SQLite cache at `path`, falling back to memory when it
    /// cannot be opened.
    pub fn open(path: &Path, facts: Arc<FactStore>) -> Self {
        match SqliteKv::open(path) {
            Ok(kv) => {
                debug!(path = %path.display(), "Opened merge cache");
                Self::new(Arc::new(kv), facts)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Storage unavailable, caching in memory only");
                let cache = Self::in_memory(facts);
                cache.degraded.store(true, Ordering::Relaxed);
                cache
            }
        }
    }

    pub fn in_memory(facts: Arc<FactStore>) -> Self {
        Self::new(Arc::new(MemoryKv::new()), facts)
    }

    /// True once the durable medium has failed; merges are no longer persisted.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    pub fn facts(&self) -> &Arc<FactStore> {
        &self.facts
    }

    pub fn location(&self) -> Option<&Path> {
        self.kv.location()
    }

    // ── Resources ──────────────────────────────────────────────────

    /// Merge fetched notifications into the stored list, newest first.
    ///
    /// An empty `incoming` returns the stored state without writing.
    #[instrument(skip_all, fields(incoming = incoming.len()))]
    pub async fn merge_notifications(&self, incoming: Vec<Notification>) -> Vec<Notification> {
        let merged = self
            .merge_list(StoreName::Notifications, NOTIFICATIONS_KEY, incoming, |items| {
                items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
            })
            .await;
        self.apply(normalize::notifications_facts(&merged));
        merged
    }

    /// Merge fetched comments for one issue, oldest first.
    #[instrument(skip_all, fields(issue = %locator, incoming = incoming.len()))]
    pub async fn merge_comments(&self, locator: &IssueLocator, incoming: Vec<Comment>) -> Vec<Comment> {
        let merged = self
            .merge_list(StoreName::Comments, &locator.cache_key(), incoming, |items| {
                items.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
            })
            .await;
        self.apply(normalize::comments_facts(locator, &merged));
        merged
    }

    /// Field-union a fetched issue into the stored record.
    #[instrument(skip_all, fields(issue = %locator))]
    pub async fn merge_issue(&self, locator: &IssueLocator, incoming: Option<Issue>) -> Option<Issue> {
        let merged = self
            .merge_single(StoreName::Issues, &locator.cache_key(), incoming)
            .await;
        if let Some(issue) = &merged {
            self.apply(normalize::issue_facts(locator, issue));
        }
        merged
    }

    /// Field-union a fetched user into the stored record.
    #[instrument(skip_all, fields(login = %login))]
    pub async fn merge_user(&self, login: &str, incoming: Option<FullUser>) -> Option<FullUser> {
        let merged = self.merge_single(StoreName::Users, login, incoming).await;
        if let Some(user) = &merged {
            self.apply(normalize::full_user_facts(user));
        }
        merged
    }

    // ── Checkpoints ────────────────────────────────────────────────

    pub async fn checkpoint(&self, name: &str) -> Option<String> {
        match self.read(StoreName::Checkpoints, name).await {
            Stored::Found(value) => value.as_str().map(str::to_string),
            Stored::Absent | Stored::Unavailable => None,
        }
    }

    pub async fn set_checkpoint(&self, name: &str, value: &str) {
        self.write(
            StoreName::Checkpoints,
            name,
            &serde_json::Value::String(value.to_string()),
        )
        .await;
    }

    /// Key counts per store, as seen by the durable medium.
    pub async fn counts(&self) -> BTreeMap<StoreName, u64> {
        let mut counts = BTreeMap::new();
        for store in StoreName::ALL {
            match self.kv.count(store).await {
                Ok(n) => {
                    counts.insert(store, n);
                }
                Err(e) => warn!(%store, error = %e, "Failed to count cached records"),
            }
        }
        counts
    }

    // ── Internals ──────────────────────────────────────────────────

    async fn merge_list<T>(
        &self,
        store: StoreName,
        key: &str,
        incoming: Vec<T>,
        sort: impl FnOnce(&mut Vec<T>),
    ) -> Vec<T>
    where
        T: Keyed + Serialize + DeserializeOwned,
    {
        let _guard = self.lock_key(store, key).await;

        let existing: Vec<T> = self.read_typed(store, key).await.unwrap_or_default();
        let changed = !incoming.is_empty();
        let mut merged = merge_by_id(existing, incoming);
        sort(&mut merged);

        if changed {
            self.write_typed(store, key, &merged).await;
        }
        merged
    }

    async fn merge_single<T>(&self, store: StoreName, key: &str, incoming: Option<T>) -> Option<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let _guard = self.lock_key(store, key).await;

        let existing: Option<T> = self.read_typed(store, key).await;
        let merged = match (existing, incoming) {
            (existing, None) => return existing,
            (None, Some(incoming)) => incoming,
            (Some(existing), Some(incoming)) => match merge_record(&existing, &incoming) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!(%store, key, error = %e, "Field union failed, keeping incoming record");
                    incoming
                }
            },
        };
        self.write_typed(store, key, &merged).await;
        Some(merged)
    }

    /// Transact normalized facts. Violations are logged by the store.
    fn apply(&self, facts: Vec<Fact>) {
        if facts.is_empty() {
            return;
        }
        let report = self.facts.transact(facts);
        debug!(
            applied = report.applied(),
            rejected = report.violations.len(),
            "Normalized into fact store"
        );
    }

    async fn lock_key(&self, store: StoreName, key: &str) -> KeyGuard<'_> {
        let slot = (store, key.to_string());
        let lock = {
            let mut locks = self.locks.lock().expect("merge cache lock table poisoned");
            Arc::clone(locks.entry(slot.clone()).or_default())
        };
        KeyGuard {
            locks: &self.locks,
            slot,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of keys with a live merge lock.
    #[cfg(test)]
    fn lock_entries(&self) -> usize {
        self.locks.lock().expect("merge cache lock table poisoned").len()
    }

    async fn read_typed<T: DeserializeOwned>(&self, store: StoreName, key: &str) -> Option<T> {
        let Stored::Found(value) = self.read(store, key).await else {
            return None;
        };
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!(%store, key, error = %e, "Unreadable cached record, merging in memory only");
                self.pin_memory_only(store, key);
                None
            }
        }
    }

    async fn write_typed<T: Serialize>(&self, store: StoreName, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.write(store, key, &json).await,
            Err(e) => warn!(%store, key, error = %e, "Failed to serialize record for cache"),
        }
    }

    async fn read(&self, store: StoreName, key: &str) -> Stored {
        if let Some(value) = self.mirror.get_now(store, key) {
            return Stored::Found(value);
        }
        match self.kv.get(store, key).await {
            Ok(Some(value)) => Stored::Found(value),
            Ok(None) => Stored::Absent,
            Err(e) => {
                self.mark_degraded(&e);
                self.pin_memory_only(store, key);
                Stored::Unavailable
            }
        }
    }

    async fn write(&self, store: StoreName, key: &str, value: &serde_json::Value) {
        self.mirror.put_now(store, key, value);
        if self.is_memory_only(store, key) {
            debug!(%store, key, "Durable record unread, keeping merge in memory");
            return;
        }
        if let Err(e) = self.kv.put(store, key, value).await {
            self.mark_degraded(&e);
        }
    }

    fn pin_memory_only(&self, store: StoreName, key: &str) {
        self.memory_only
            .lock()
            .expect("merge cache key set poisoned")
            .insert((store, key.to_string()));
    }

    fn is_memory_only(&self, store: StoreName, key: &str) -> bool {
        self.memory_only
            .lock()
            .expect("merge cache key set poisoned")
            .contains(&(store, key.to_string()))
    }

    fn mark_degraded(&self, error: &crate::error::InboxError) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            warn!(%error, "Storage unavailable, continuing in memory only");
        } else {
            debug!(%error, "Storage still unavailable");
        }
    }
}
