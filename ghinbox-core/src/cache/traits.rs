use std::path::Path;

/// Named stores inside the durable key-value medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StoreName {
    /// Single key `notifications` holding the merged notification list.
    Notifications,
    /// Issue and pull request records keyed by `owner/repo#number`.
    Issues,
    /// Comment lists keyed by `owner/repo#number`.
    Comments,
    /// Users keyed by login.
    Users,
    /// Sync watermarks keyed by resource kind.
    Checkpoints,
}

impl StoreName {
    pub const ALL: [Self; 5] = [
        Self::Notifications,
        Self::Issues,
        Self::Comments,
        Self::Users,
        Self::Checkpoints,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notifications => "notifications",
            Self::Issues => "issues",
            Self::Comments => "comments",
            Self::Users => "users",
            Self::Checkpoints => "checkpoints",
        }
    }
}

impl std::fmt::Display for StoreName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable key-value collaborator. Values are JSON documents.
#[async_trait::async_trait]
pub trait KvStore: Send + Sync + std::fmt::Debug {
    /// Fetch the value stored under `key`, if any.
    async fn get(
        &self,
        store: StoreName,
        key: &str,
    ) -> crate::error::Result<Option<serde_json::Value>>;

    /// Insert or replace the value under `key`.
    async fn put(
        &self,
        store: StoreName,
        key: &str,
        value: &serde_json::Value,
    ) -> crate::error::Result<()>;

    /// Number of keys in `store`.
    async fn count(&self, store: StoreName) -> crate::error::Result<u64>;

    /// Backing file, or `None` for purely in-memory stores.
    fn location(&self) -> Option<&Path>;
}
