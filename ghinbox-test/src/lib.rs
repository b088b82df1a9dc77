// Integration test utilities: domain fixtures, a scripted remote, and a
// storage medium that always fails.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::Notify;

use ghinbox_core::cache::{KvStore, MergeCache, StoreName};
use ghinbox_core::config::InboxConfig;
use ghinbox_core::error::{FetchError, StoreError};
use ghinbox_core::facts::FactStore;
use ghinbox_core::remote::RemoteSource;
use ghinbox_core::sync::{SyncContext, SyncController};
use ghinbox_core::types::{
    Comment, FetchWindow, FullUser, Issue, Notification, NotificationPage, NotificationSubject,
    Repository, User,
};

pub const API: &str = "https://api.github.com";

// ── Domain fixtures ────────────────────────────────────────────────

/// Fixed timestamp on 2024-03-01 at `hour`:`minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, hour, minute, 0)
        .single()
        .expect("valid fixture timestamp")
}

/// Stable numeric id for a fixture name, so the same login always maps to
/// the same GitHub id.
pub fn stable_id(name: &str) -> u64 {
    name.bytes()
        .fold(7u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)))
        % 1_000_000
}

pub fn user(login: &str) -> User {
    let id = stable_id(login);
    User {
        login: login.to_string(),
        id,
        avatar_url: Some(format!("https://avatars.example/{id}")),
        url: Some(format!("{API}/users/{login}")),
    }
}

pub fn full_user(login: &str, name: Option<&str>) -> FullUser {
    FullUser {
        user: user(login),
        name: name.map(str::to_string),
        kind: Some("User".to_string()),
    }
}

/// Repository `owner/name`.
pub fn repository(full_name: &str) -> Repository {
    let (owner, name) = full_name.split_once('/').unwrap_or((full_name, full_name));
    Repository {
        id: stable_id(full_name),
        name: name.to_string(),
        full_name: full_name.to_string(),
        owner: user(owner),
    }
}

pub fn issue_api_url(repo: &str, number: u64) -> String {
    format!("{API}/repos/{repo}/issues/{number}")
}

/// Notification about issue `number` in `repo`.
pub fn notification(id: &str, repo: &str, number: u64, updated_at: DateTime<Utc>) -> Notification {
    Notification {
        id: id.to_string(),
        unread: true,
        reason: "subscribed".to_string(),
        updated_at,
        last_read_at: None,
        subject: NotificationSubject {
            title: format!("Issue {number}"),
            url: Some(issue_api_url(repo, number)),
            latest_comment_url: None,
            kind: "Issue".to_string(),
        },
        repository: repository(repo),
    }
}

pub fn issue(repo: &str, number: u64, title: &str, body: &str) -> Issue {
    Issue {
        id: 5_000 + number,
        number,
        title: title.to_string(),
        url: issue_api_url(repo, number),
        user: Some(user("alice")),
        assignees: Vec::new(),
        state: "open".to_string(),
        state_reason: None,
        labels: Vec::new(),
        body: Some(body.to_string()),
        comments_url: Some(format!("{}/comments", issue_api_url(repo, number))),
        created_at: at(8, 0),
        updated_at: at(9, 0),
    }
}

pub fn comment(id: u64, author: &str, body: &str, repo: &str, number: u64) -> Comment {
    Comment {
        id,
        user: user(author),
        body: body.to_string(),
        created_at: at(10, 0),
        updated_at: at(10, u32::try_from(id % 60).unwrap_or(0)),
        issue_url: issue_api_url(repo, number),
    }
}

// ── Scripted remote ────────────────────────────────────────────────

/// Remote collaborator answering from queued responses.
///
/// Notification responses are consumed in order; an empty queue answers
/// with no items. Issues, comments, and users are served from fixed tables
/// keyed by URL, and anything missing is a 404.
#[derive(Debug, Default)]
pub struct ScriptedRemote {
    notifications: Mutex<VecDeque<Result<Vec<Notification>, FetchError>>>,
    issues: Mutex<HashMap<String, Issue>>,
    comments: Mutex<HashMap<String, Vec<Comment>>>,
    users: Mutex<HashMap<String, FullUser>>,
    windows: Mutex<Vec<FetchWindow>>,
    calls: AtomicUsize,
    gated: AtomicBool,
    gate: Notify,
}

impl ScriptedRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_notifications(&self, items: Vec<Notification>) {
        self.lock_queue().push_back(Ok(items));
    }

    pub fn push_failure(&self, error: FetchError) {
        self.lock_queue().push_back(Err(error));
    }

    pub fn serve_issue(&self, issue: Issue) {
        let mut issues = self.issues.lock().expect("scripted remote poisoned");
        issues.insert(issue.url.clone(), issue);
    }

    pub fn serve_comments(&self, issue_url: &str, comments: Vec<Comment>) {
        let mut table = self.comments.lock().expect("scripted remote poisoned");
        table.insert(format!("{issue_url}/comments"), comments);
    }

    pub fn serve_user(&self, user: FullUser) {
        let mut users = self.users.lock().expect("scripted remote poisoned");
        users.insert(format!("{API}/users/{}", user.user.login), user);
    }

    /// Make every later fetch wait for [`release`](Self::release).
    pub fn hold(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Let one held (or the next) fetch proceed.
    pub fn release(&self) {
        self.gate.notify_one();
    }

    /// Total fetches of any kind.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every notifications window requested so far, in order.
    pub fn windows(&self) -> Vec<FetchWindow> {
        self.windows.lock().expect("scripted remote poisoned").clone()
    }

    fn lock_queue(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<Vec<Notification>, FetchError>>> {
        self.notifications.lock().expect("scripted remote poisoned")
    }

    async fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gated.load(Ordering::SeqCst) {
            self.gate.notified().await;
        }
    }

    fn not_found(url: &str) -> FetchError {
        FetchError::Api {
            status: 404,
            body: format!("no fixture for {url}"),
        }
    }
}

#[async_trait::async_trait]
impl RemoteSource for ScriptedRemote {
    async fn fetch_notifications(&self, window: &FetchWindow) -> Result<NotificationPage, FetchError> {
        self.windows
            .lock()
            .expect("scripted remote poisoned")
            .push(*window);
        self.enter().await;
        let items = self.lock_queue().pop_front().unwrap_or(Ok(Vec::new()))?;
        Ok(NotificationPage {
            items,
            since: Some(window.since),
            before: Some(window.before),
        })
    }

    async fn fetch_issue(&self, url: &str) -> Result<Issue, FetchError> {
        self.enter().await;
        let issues = self.issues.lock().expect("scripted remote poisoned");
        issues.get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn fetch_issue_comments(&self, url: &str) -> Result<Vec<Comment>, FetchError> {
        self.enter().await;
        let comments = self.comments.lock().expect("scripted remote poisoned");
        comments.get(url).cloned().ok_or_else(|| Self::not_found(url))
    }

    async fn fetch_user(&self, url: &str) -> Result<FullUser, FetchError> {
        self.enter().await;
        let users = self.users.lock().expect("scripted remote poisoned");
        users.get(url).cloned().ok_or_else(|| Self::not_found(url))
    }
}

// ── Failing storage ────────────────────────────────────────────────

/// Durable medium that rejects every read and write.
#[derive(Debug, Default)]
pub struct FailingKv;

#[async_trait::async_trait]
impl KvStore for FailingKv {
    async fn get(
        &self,
        store: StoreName,
        _key: &str,
    ) -> ghinbox_core::error::Result<Option<serde_json::Value>> {
        Err(StoreError::Unavailable(format!("{store}: disk on fire")).into())
    }

    async fn put(
        &self,
        store: StoreName,
        _key: &str,
        _value: &serde_json::Value,
    ) -> ghinbox_core::error::Result<()> {
        Err(StoreError::Unavailable(format!("{store}: disk on fire")).into())
    }

    async fn count(&self, store: StoreName) -> ghinbox_core::error::Result<u64> {
        Err(StoreError::Unavailable(format!("{store}: disk on fire")).into())
    }

    fn location(&self) -> Option<&Path> {
        None
    }
}

/// Wraps a working medium and fails its first `reads` gets, as a medium
/// that is briefly unreachable at startup would.
#[derive(Debug)]
pub struct FlakyReadKv {
    inner: Arc<dyn KvStore>,
    failing_reads: AtomicUsize,
}

impl FlakyReadKv {
    pub fn new(inner: Arc<dyn KvStore>, reads: usize) -> Self {
        Self {
            inner,
            failing_reads: AtomicUsize::new(reads),
        }
    }
}

#[async_trait::async_trait]
impl KvStore for FlakyReadKv {
    async fn get(
        &self,
        store: StoreName,
        key: &str,
    ) -> ghinbox_core::error::Result<Option<serde_json::Value>> {
        let failed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(StoreError::Unavailable(format!("{store}: read timed out")).into());
        }
        self.inner.get(store, key).await
    }

    async fn put(
        &self,
        store: StoreName,
        key: &str,
        value: &serde_json::Value,
    ) -> ghinbox_core::error::Result<()> {
        self.inner.put(store, key, value).await
    }

    async fn count(&self, store: StoreName) -> ghinbox_core::error::Result<u64> {
        self.inner.count(store).await
    }

    fn location(&self) -> Option<&Path> {
        self.inner.location()
    }
}

// ── Harness ────────────────────────────────────────────────────────

/// A controller wired to `remote` and `cache`, plus the shared fact store.
#[derive(Debug)]
pub struct Harness {
    pub controller: SyncController,
    pub cache: Arc<MergeCache>,
    pub facts: Arc<FactStore>,
}

impl Harness {
    pub fn in_memory(remote: Arc<ScriptedRemote>) -> Self {
        let facts = Arc::new(FactStore::github());
        let cache = Arc::new(MergeCache::in_memory(Arc::clone(&facts)));
        Self::with_cache(remote, cache, InboxConfig::default())
    }

    pub fn on_disk(remote: Arc<ScriptedRemote>, path: &Path, config: InboxConfig) -> Self {
        let facts = Arc::new(FactStore::github());
        let cache = Arc::new(MergeCache::open(path, Arc::clone(&facts)));
        Self::with_cache(remote, cache, config)
    }

    /// Load a saved notifications watermark, as startup does.
    pub async fn restore_cursor(&self) {
        self.controller.context().restore_cursor().await;
    }

    pub fn with_cache(remote: Arc<ScriptedRemote>, cache: Arc<MergeCache>, config: InboxConfig) -> Self {
        let facts = Arc::clone(cache.facts());
        let ctx = SyncContext::new(config, remote, Arc::clone(&cache));
        Self {
            controller: SyncController::new(Arc::new(ctx)),
            cache,
            facts,
        }
    }
}
