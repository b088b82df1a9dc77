// Per-kind load/refresh behavior driven by the poll loop.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use tracing::debug;

use crate::cache::NOTIFICATIONS_KEY;
use crate::error::FetchError;
use crate::types::{Comment, FullUser, Issue, IssueLocator, Notification};

use super::controller::SyncContext;

/// Logical key of one synced resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKey {
    Notifications,
    Issue(String),
    Comments(String),
    User(String),
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Notifications => f.write_str(NOTIFICATIONS_KEY),
            Self::Issue(key) => write!(f, "issue:{key}"),
            Self::Comments(key) => write!(f, "comments:{key}"),
            Self::User(login) => write!(f, "user:{login}"),
        }
    }
}

/// One kind of synced resource.
#[async_trait::async_trait]
pub(crate) trait Resource: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;

    fn key(&self) -> ResourceKey;

    fn interval(&self, ctx: &SyncContext) -> Duration;

    /// Stored state, merged with nothing.
    async fn load(&self, ctx: &SyncContext) -> Self::Value;

    /// Fetch, merge, and return the merged state.
    async fn refresh(&self, ctx: &SyncContext) -> Result<Self::Value, FetchError>;
}

pub(crate) struct Notifications;

#[async_trait::async_trait]
impl Resource for Notifications {
    type Value = Vec<Notification>;

    fn key(&self) -> ResourceKey {
        ResourceKey::Notifications
    }

    fn interval(&self, ctx: &SyncContext) -> Duration {
        ctx.config().sync.notifications_interval()
    }

    async fn load(&self, ctx: &SyncContext) -> Vec<Notification> {
        ctx.cache().merge_notifications(Vec::new()).await
    }

    async fn refresh(&self, ctx: &SyncContext) -> Result<Vec<Notification>, FetchError> {
        let window = ctx.cursor().window(Utc::now(), ctx.config().sync.lookback());
        let page = ctx.remote().fetch_notifications(&window).await?;
        let merged = ctx.cache().merge_notifications(page.items).await;

        ctx.cursor().advance(&window);
        if ctx.config().sync.persist_cursor {
            let saved = window.before.to_rfc3339_opts(SecondsFormat::Secs, true);
            ctx.cache().set_checkpoint(NOTIFICATIONS_KEY, &saved).await;
        }
        debug!(since = %window.since, before = %window.before, total = merged.len(), "Advanced notifications cursor");
        Ok(merged)
    }
}

pub(crate) struct IssueRecord(pub IssueLocator);

#[async_trait::async_trait]
impl Resource for IssueRecord {
    type Value = Option<Issue>;

    fn key(&self) -> ResourceKey {
        ResourceKey::Issue(self.0.cache_key())
    }

    fn interval(&self, ctx: &SyncContext) -> Duration {
        ctx.config().sync.resource_interval()
    }

    async fn load(&self, ctx: &SyncContext) -> Option<Issue> {
        ctx.cache().merge_issue(&self.0, None).await
    }

    async fn refresh(&self, ctx: &SyncContext) -> Result<Option<Issue>, FetchError> {
        let url = self.0.issue_url(&ctx.config().github.api_base);
        let issue = ctx.remote().fetch_issue(&url).await?;
        Ok(ctx.cache().merge_issue(&self.0, Some(issue)).await)
    }
}

pub(crate) struct IssueComments(pub IssueLocator);

#[async_trait::async_trait]
impl Resource for IssueComments {
    type Value = Vec<Comment>;

    fn key(&self) -> ResourceKey {
        ResourceKey::Comments(self.0.cache_key())
    }

    fn interval(&self, ctx: &SyncContext) -> Duration {
        ctx.config().sync.resource_interval()
    }

    async fn load(&self, ctx: &SyncContext) -> Vec<Comment> {
        ctx.cache().merge_comments(&self.0, Vec::new()).await
    }

    async fn refresh(&self, ctx: &SyncContext) -> Result<Vec<Comment>, FetchError> {
        let url = self.0.comments_url(&ctx.config().github.api_base);
        let comments = ctx.remote().fetch_issue_comments(&url).await?;
        Ok(ctx.cache().merge_comments(&self.0, comments).await)
    }
}

pub(crate) struct UserProfile(pub String);

#[async_trait::async_trait]
impl Resource for UserProfile {
    type Value = Option<FullUser>;

    fn key(&self) -> ResourceKey {
        ResourceKey::User(self.0.clone())
    }

    fn interval(&self, ctx: &SyncContext) -> Duration {
        ctx.config().sync.resource_interval()
    }

    async fn load(&self, ctx: &SyncContext) -> Option<FullUser> {
        ctx.cache().merge_user(&self.0, None).await
    }

    async fn refresh(&self, ctx: &SyncContext) -> Result<Option<FullUser>, FetchError> {
        let url = format!(
            "{}/users/{}",
            ctx.config().github.api_base.trim_end_matches('/'),
            self.0
        );
        let user = ctx.remote().fetch_user(&url).await?;
        Ok(ctx.cache().merge_user(&self.0, Some(user)).await)
    }
}
