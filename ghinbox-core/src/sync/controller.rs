// Stale-while-revalidate poll loops, one per resource key, shared by all
// subscribers of that key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cache::{MergeCache, NOTIFICATIONS_KEY};
use crate::config::InboxConfig;
use crate::facts::FactStore;
use crate::remote::RemoteSource;
use crate::types::{Comment, FullUser, Issue, IssueLocator, Notification};

use super::cursor::NotificationCursor;
use super::resource::{
    IssueComments, IssueRecord, Notifications, Resource, ResourceKey, UserProfile,
};

/// Everything a poll loop needs, owned in one place.
///
/// Created once at startup and shared by handle with the controller.
pub struct SyncContext {
    config: InboxConfig,
    remote: Arc<dyn RemoteSource>,
    cache: Arc<MergeCache>,
    cursor: NotificationCursor,
    shutdown: watch::Sender<bool>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl SyncContext {
    pub fn new(config: InboxConfig, remote: Arc<dyn RemoteSource>, cache: Arc<MergeCache>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            remote,
            cache,
            cursor: NotificationCursor::new(),
            shutdown,
        }
    }

    /// Load the saved notifications watermark when cursor persistence is on.
    pub async fn restore_cursor(&self) {
        if !self.config.sync.persist_cursor {
            return;
        }
        let Some(saved) = self.cache.checkpoint(NOTIFICATIONS_KEY).await else {
            return;
        };
        match DateTime::parse_from_rfc3339(&saved) {
            Ok(t) => {
                let t = t.to_utc();
                self.cursor.restore(t);
                info!(since = %t, "Restored notifications cursor");
            }
            Err(e) => warn!(saved, error = %e, "Ignoring unreadable notifications cursor"),
        }
    }

    pub fn config(&self) -> &InboxConfig {
        &self.config
    }

    pub fn remote(&self) -> &dyn RemoteSource {
        self.remote.as_ref()
    }

    pub fn cache(&self) -> &MergeCache {
        &self.cache
    }

    pub fn facts(&self) -> &Arc<FactStore> {
        self.cache.facts()
    }

    pub fn cursor(&self) -> &NotificationCursor {
        &self.cursor
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// One value published by a poll loop.
#[derive(Debug)]
struct Emission<T> {
    value: T,
    /// False for the stored state emitted before the first refresh.
    fresh: bool,
}

type Latest<T> = Option<Emission<T>>;

/// Subscriber side of one resource key.
///
/// The first [`next`](Self::next) yields the latest emitted value at once
/// (if any); later calls wait for the next emission.
#[derive(Debug)]
pub struct ResourceStream<T> {
    rx: watch::Receiver<Latest<T>>,
}

impl<T: Clone> ResourceStream<T> {
    fn new(mut rx: watch::Receiver<Latest<T>>) -> Self {
        rx.mark_changed();
        Self { rx }
    }

    /// Next emission, or `None` once the poll loop has stopped.
    pub async fn next(&mut self) -> Option<T> {
        self.next_matching(|_| true).await
    }

    /// Next emission produced by a successful refresh, skipping stored state.
    pub async fn next_fresh(&mut self) -> Option<T> {
        self.next_matching(|e| e.fresh).await
    }

    /// Most recent emission without waiting.
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().as_ref().map(|e| e.value.clone())
    }

    /// True once any refresh for this key has succeeded.
    pub fn is_fresh(&self) -> bool {
        self.rx.borrow().as_ref().is_some_and(|e| e.fresh)
    }

    async fn next_matching(&mut self, accept: impl Fn(&Emission<T>) -> bool) -> Option<T> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(e) = self.rx.borrow_and_update().as_ref().filter(|e| accept(e)) {
                return Some(e.value.clone());
            }
        }
    }
}

type Slots<T> = Arc<Mutex<HashMap<ResourceKey, watch::Sender<Latest<T>>>>>;

/// Lazily created, shared poll loops keyed by resource.
#[derive(Debug)]
pub struct SyncController {
    ctx: Arc<SyncContext>,
    notifications: Slots<Vec<Notification>>,
    issues: Slots<Option<Issue>>,
    comments: Slots<Vec<Comment>>,
    users: Slots<Option<FullUser>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncController {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            notifications: Slots::default(),
            issues: Slots::default(),
            comments: Slots::default(),
            users: Slots::default(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    pub fn notifications(&self) -> ResourceStream<Vec<Notification>> {
        self.subscribe(&self.notifications, Notifications)
    }

    pub fn issue(&self, locator: &IssueLocator) -> ResourceStream<Option<Issue>> {
        self.subscribe(&self.issues, IssueRecord(locator.clone()))
    }

    pub fn comments(&self, locator: &IssueLocator) -> ResourceStream<Vec<Comment>> {
        self.subscribe(&self.comments, IssueComments(locator.clone()))
    }

    pub fn user(&self, login: &str) -> ResourceStream<Option<FullUser>> {
        self.subscribe(&self.users, UserProfile(login.to_string()))
    }

    /// Keys with a running poll loop.
    pub fn active_keys(&self) -> Vec<ResourceKey> {
        let mut keys = Vec::new();
        keys.extend(slot_keys(&self.notifications));
        keys.extend(slot_keys(&self.issues));
        keys.extend(slot_keys(&self.comments));
        keys.extend(slot_keys(&self.users));
        keys.sort();
        keys
    }

    /// Stop every poll loop and wait for in-flight refreshes to finish.
    pub async fn shutdown(&self) {
        self.ctx.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock().expect("controller task list poisoned"));
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Poll loop ended abnormally");
            }
        }
        info!("Sync controller stopped");
    }

    fn subscribe<R: Resource>(&self, slots: &Slots<R::Value>, resource: R) -> ResourceStream<R::Value> {
        let key = resource.key();
        let mut map = slots.lock().expect("stream slots poisoned");
        if let Some(tx) = map.get(&key) {
            debug!(%key, "Joining existing poll loop");
            return ResourceStream::new(tx.subscribe());
        }

        let (tx, rx) = watch::channel(None);
        map.insert(key.clone(), tx.clone());
        drop(map);

        debug!(%key, "Starting poll loop");
        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.ctx),
            resource,
            tx,
            Arc::clone(slots),
        ));
        let mut tasks = self.tasks.lock().expect("controller task list poisoned");
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        ResourceStream::new(rx)
    }
}

fn slot_keys<T>(slots: &Slots<T>) -> Vec<ResourceKey> {
    slots
        .lock()
        .expect("stream slots poisoned")
        .keys()
        .cloned()
        .collect()
}

/// Emit stored state, then refresh now and on every interval tick.
///
/// Exits on shutdown, or once the key has had no subscribers for the idle TTL.
async fn poll_loop<R: Resource>(
    ctx: Arc<SyncContext>,
    resource: R,
    tx: watch::Sender<Latest<R::Value>>,
    slots: Slots<R::Value>,
) {
    let key = resource.key();
    let mut shutdown = ctx.shutdown.subscribe();

    let stored = resource.load(&ctx).await;
    tx.send_replace(Some(Emission {
        value: stored,
        fresh: false,
    }));
    refresh(&ctx, &resource, &key, &tx).await;

    let period = resource.interval(&ctx);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow_and_update() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => refresh(&ctx, &resource, &key, &tx).await,
            () = tx.closed() => {
                let idle = tokio::select! {
                    () = tokio::time::sleep(ctx.config.sync.idle_ttl()) => true,
                    _ = shutdown.changed() => false,
                };
                if idle && evict_if_idle(&slots, &key, &tx) {
                    debug!(%key, "Evicted idle poll loop");
                    return;
                }
            }
            _ = shutdown.changed() => {}
        }
    }

    slots.lock().expect("stream slots poisoned").remove(&key);
    debug!(%key, "Poll loop stopped");
}

async fn refresh<R: Resource>(
    ctx: &SyncContext,
    resource: &R,
    key: &ResourceKey,
    tx: &watch::Sender<Latest<R::Value>>,
) {
    match resource.refresh(ctx).await {
        Ok(value) => {
            tx.send_replace(Some(Emission { value, fresh: true }));
        }
        Err(e) => warn!(%key, error = %e, "Refresh failed, retrying next tick"),
    }
}

/// Remove the slot if nobody subscribed in the meantime.
///
/// Runs under the slot lock, so a concurrent subscribe either lands before
/// (and keeps the loop alive) or after (and starts a new one).
fn evict_if_idle<T>(slots: &Slots<T>, key: &ResourceKey, tx: &watch::Sender<Latest<T>>) -> bool {
    let mut map = slots.lock().expect("stream slots poisoned");
    if tx.receiver_count() > 0 {
        return false;
    }
    map.remove(key);
    true
}
