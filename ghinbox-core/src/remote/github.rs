// GitHub REST client: notifications, issues, comments, and users.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::SecondsFormat;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use crate::config::GitHubSection;
use crate::error::FetchError;
use crate::types::{Comment, FetchWindow, FullUser, Issue, Notification, NotificationPage};

use super::traits::RemoteSource;

/// Pause and wait for reset when remaining drops below this threshold.
const RATE_LIMIT_PAUSE_THRESHOLD: u32 = 5;
/// Upper bound on a single backoff sleep.
const MAX_BACKOFF: Duration = Duration::from_secs(60);
/// Stop following pages after this many, whatever the server says.
const MAX_PAGES: u32 = 50;

/// GitHub REST API client.
///
/// Rate-limit state is shared across concurrent requests through atomics.
#[derive(Debug)]
pub struct GitHubClient {
    client: Client,
    api_base: String,
    token: Option<String>,
    max_retries: u32,
    per_page: u32,
    /// Remaining API calls before the rate limit resets.
    rate_remaining: AtomicU32,
    /// Unix timestamp when the rate limit window resets.
    rate_reset: AtomicU64,
}

impl GitHubClient {
    /// Build from config, reading the token from the configured env var.
    pub fn from_config(config: &GitHubSection) -> Result<Self, FetchError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| FetchError::MissingToken(config.token_env.clone()))?;
        Ok(Self::new(config, Some(token)))
    }

    /// Build with an explicit token (or none, for public data).
    pub fn new(config: &GitHubSection, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            max_retries: config.max_retries,
            per_page: config.per_page.clamp(1, 100),
            rate_remaining: AtomicU32::new(u32::MAX),
            rate_reset: AtomicU64::new(0),
        }
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    /// Absolute URL for `path_or_url`. Full URLs pass through.
    fn resolve_url(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{path_or_url}", self.api_base)
        }
    }

    /// GET and decode one resource, retrying rate-limited responses.
    async fn api_get<T: DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
        self.wait_for_rate_reset().await;

        let mut delay = Duration::from_secs(1);

        for attempt in 0..=self.max_retries {
            let mut req = self
                .client
                .get(url)
                .header("Accept", "application/vnd.github+json")
                .header("X-GitHub-Api-Version", "2022-11-28")
                .header("User-Agent", concat!("ghinbox/", env!("CARGO_PKG_VERSION")));

            if let Some(token) = &self.token {
                req = req.header("Authorization", format!("Bearer {token}"));
            }

            debug!(url = %url, attempt, "GitHub API request");

            let resp = req
                .send()
                .await
                .map_err(|e| FetchError::Network(format!("{url}: {e}")))?;

            self.update_rate_limit(&resp);

            if resp.status().is_success() {
                return resp
                    .json()
                    .await
                    .map_err(|e| FetchError::Decode(format!("{url}: {e}")));
            }

            let status = resp.status().as_u16();
            if (status == 403 || status == 429) && attempt < self.max_retries {
                let wait = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map_or(delay, Duration::from_secs);
                warn!(
                    attempt,
                    status,
                    wait_secs = wait.as_secs(),
                    "Rate limited, backing off"
                );
                tokio::time::sleep(wait).await;
                delay = (delay * 2).min(MAX_BACKOFF);
                continue;
            }

            if status == 429 || (status == 403 && self.rate_remaining.load(Ordering::Relaxed) == 0) {
                return Err(FetchError::RateLimited(url.to_string()));
            }
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Api { status, body });
        }

        Err(FetchError::RateLimited(url.to_string()))
    }

    /// Follow `page=1,2,...` until a short page comes back.
    async fn api_get_all<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, FetchError> {
        let sep = if url.contains('?') { '&' } else { '?' };
        let mut all = Vec::new();

        for page in 1..=MAX_PAGES {
            let page_url = format!("{url}{sep}per_page={}&page={page}", self.per_page);
            let items: Vec<T> = self.api_get(&page_url).await?;
            let n = items.len();
            all.extend(items);
            if n < self.per_page as usize {
                return Ok(all);
            }
        }

        warn!(url = %url, pages = MAX_PAGES, "Stopped paginating at page limit");
        Ok(all)
    }

    /// Update rate limit state from response headers.
    fn update_rate_limit(&self, resp: &reqwest::Response) {
        if let Some(remaining) = resp
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.rate_remaining.store(remaining, Ordering::Relaxed);
            if remaining < 10 {
                warn!(remaining, "GitHub API rate limit low");
            }
        }
        if let Some(reset) = resp
            .headers()
            .get("x-ratelimit-reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.rate_reset.store(reset, Ordering::Relaxed);
        }
    }

    /// Sleep until the rate limit window resets if remaining is low.
    async fn wait_for_rate_reset(&self) {
        let remaining = self.rate_remaining.load(Ordering::Relaxed);
        if remaining > RATE_LIMIT_PAUSE_THRESHOLD {
            return;
        }
        let reset_at = self.rate_reset.load(Ordering::Relaxed);
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        if reset_at > now {
            let wait = reset_at - now + 1;
            warn!(remaining, wait_secs = wait, "Rate limit low, waiting for reset");
            tokio::time::sleep(Duration::from_secs(wait)).await;
        }
    }
}

/// Query string for one notifications window. `all=true` includes read threads.
fn notifications_query(window: &FetchWindow) -> String {
    format!(
        "/notifications?all=true&since={}&before={}",
        window.since.to_rfc3339_opts(SecondsFormat::Secs, true),
        window.before.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

#[async_trait::async_trait]
impl RemoteSource for GitHubClient {
    #[instrument(skip_all, fields(since = %window.since, before = %window.before))]
    async fn fetch_notifications(&self, window: &FetchWindow) -> Result<NotificationPage, FetchError> {
        let url = self.resolve_url(&notifications_query(window));
        let items: Vec<Notification> = self.api_get_all(&url).await?;
        debug!(count = items.len(), "Fetched notifications");
        Ok(NotificationPage {
            items,
            since: Some(window.since),
            before: Some(window.before),
        })
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_issue(&self, url: &str) -> Result<Issue, FetchError> {
        self.api_get(&self.resolve_url(url)).await
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_issue_comments(&self, url: &str) -> Result<Vec<Comment>, FetchError> {
        self.api_get_all(&self.resolve_url(url)).await
    }

    #[instrument(skip_all, fields(url = %url))]
    async fn fetch_user(&self, url: &str) -> Result<FullUser, FetchError> {
        self.api_get(&self.resolve_url(url)).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn client() -> GitHubClient {
        GitHubClient::new(&GitHubSection::default(), None)
    }

    #[test]
    fn new_client_has_unlimited_rate() {
        let c = client();
        assert_eq!(c.rate_remaining.load(Ordering::Relaxed), u32::MAX);
        assert_eq!(c.rate_reset.load(Ordering::Relaxed), 0);
        assert_eq!(c.per_page, 100);
    }

    #[test]
    fn resolve_url_prefixes_paths_only() {
        let c = client();
        assert_eq!(
            c.resolve_url("/users/bob"),
            "https://api.github.com/users/bob"
        );
        assert_eq!(
            c.resolve_url("https://ghe.example/api/v3/users/bob"),
            "https://ghe.example/api/v3/users/bob"
        );
    }

    #[test]
    fn trailing_slash_in_api_base_is_trimmed() {
        let section = GitHubSection {
            api_base: "https://ghe.example/api/v3/".into(),
            ..GitHubSection::default()
        };
        let c = GitHubClient::new(&section, None);
        assert_eq!(c.api_base(), "https://ghe.example/api/v3");
    }

    #[test]
    fn notifications_query_formats_window() {
        let window = FetchWindow {
            since: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            before: Utc.with_ymd_and_hms(2024, 3, 2, 12, 30, 0).unwrap(),
        };
        assert_eq!(
            notifications_query(&window),
            "/notifications?all=true&since=2024-03-01T00:00:00Z&before=2024-03-02T12:30:00Z"
        );
    }

    #[test]
    fn missing_token_is_reported() {
        let section = GitHubSection {
            token_env: "GHINBOX_TEST_TOKEN_THAT_IS_NEVER_SET".into(),
            ..GitHubSection::default()
        };
        let err = GitHubClient::from_config(&section).unwrap_err();
        assert!(matches!(err, FetchError::MissingToken(ref v) if v.contains("NEVER_SET")));
    }

    #[tokio::test]
    async fn no_wait_when_budget_remains() {
        let c = client();
        c.rate_remaining.store(100, Ordering::Relaxed);
        c.rate_reset.store(u64::MAX, Ordering::Relaxed);
        tokio::time::timeout(Duration::from_millis(50), c.wait_for_rate_reset())
            .await
            .unwrap();
    }
}
