use crate::error::FetchError;
use crate::types::{Comment, FetchWindow, FullUser, Issue, NotificationPage};

/// Remote collaborator the sync controller polls.
///
/// URLs are API URLs as found in notification subjects and issue records.
#[async_trait::async_trait]
pub trait RemoteSource: Send + Sync {
    /// All notifications updated inside `window`, every page concatenated.
    async fn fetch_notifications(&self, window: &FetchWindow) -> Result<NotificationPage, FetchError>;

    async fn fetch_issue(&self, url: &str) -> Result<Issue, FetchError>;

    /// All comments of an issue, every page concatenated.
    async fn fetch_issue_comments(&self, url: &str) -> Result<Vec<Comment>, FetchError>;

    async fn fetch_user(&self, url: &str) -> Result<FullUser, FetchError>;
}
