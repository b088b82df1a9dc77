pub mod init;
pub mod issue;
pub mod status;
pub mod user;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Subcommand;

use ghinbox_core::cache::MergeCache;
use ghinbox_core::config::InboxConfig;
use ghinbox_core::facts::FactStore;
use ghinbox_core::remote::GitHubClient;
use ghinbox_core::sync::{ResourceStream, SyncContext, SyncController};
use ghinbox_core::views::Views;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create `.ghinbox/config.toml` with default settings
    Init(init::InitArgs),
    /// Poll notifications and print each merged update
    Watch(watch::WatchArgs),
    /// Show an issue or pull request, optionally with its comments
    Issue(issue::IssueArgs),
    /// Show a user profile and everything that references them
    User(user::UserArgs),
    /// Show what the local cache holds
    Status(status::StatusArgs),
}

pub async fn run(cmd: Command) -> anyhow::Result<()> {
    match cmd {
        Command::Init(args) => init::run(args),
        Command::Watch(args) => watch::run(args).await,
        Command::Issue(args) => issue::run(args).await,
        Command::User(args) => user::run(args).await,
        Command::Status(args) => status::run(args).await,
    }
}

/// Directory holding config and cache for a workspace root.
pub fn ghinbox_dir(root: &Path) -> PathBuf {
    root.join(".ghinbox")
}

/// Resolve `path` and load its config. Fails if `ghinbox init` never ran there.
pub fn load_config(path: &Path) -> anyhow::Result<(PathBuf, InboxConfig)> {
    let root = std::fs::canonicalize(path)
        .with_context(|| format!("Cannot resolve path: {}", path.display()))?;
    let dir = ghinbox_dir(&root);
    if !dir.exists() {
        anyhow::bail!(
            "ghinbox is not initialized in {}. Run `ghinbox init` first.",
            root.display()
        );
    }
    let config = InboxConfig::load(&dir.join("config.toml")).context("Cannot load config")?;
    Ok((dir, config))
}

/// Open the cache at the configured location, sharing `facts`.
pub fn open_cache(dir: &Path, config: &InboxConfig, facts: Arc<FactStore>) -> Arc<MergeCache> {
    Arc::new(MergeCache::open(&config.storage.resolve(dir), facts))
}

/// Everything a syncing command needs.
#[derive(Debug)]
pub struct Session {
    pub controller: SyncController,
    pub views: Views,
}

impl Session {
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        let (dir, config) = load_config(path)?;
        let client = GitHubClient::from_config(&config.github)?;

        let facts = Arc::new(FactStore::github());
        let cache = open_cache(&dir, &config, Arc::clone(&facts));
        if cache.is_degraded() {
            eprintln!("warning: cache storage unavailable, changes will not be saved");
        }

        let views = Views::new(facts, config.views.clone());
        let ctx = SyncContext::new(config, Arc::new(client), cache);
        ctx.restore_cursor().await;

        Ok(Self {
            controller: SyncController::new(Arc::new(ctx)),
            views,
        })
    }
}

/// Wait for the first successfully fetched value.
pub async fn first_fresh<T: Clone>(
    stream: &mut ResourceStream<T>,
    timeout: Duration,
) -> anyhow::Result<T> {
    match tokio::time::timeout(timeout, stream.next_fresh()).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => anyhow::bail!("Sync stopped before a response arrived"),
        Err(_) => anyhow::bail!(
            "No successful GitHub API response within {}s (run with -v for details)",
            timeout.as_secs()
        ),
    }
}

/// Print `value` as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Short human label for an entity from the fact store.
pub fn describe(entity: &ghinbox_core::facts::Entity) -> String {
    use ghinbox_core::facts::attr;

    if let Some(login) = entity.str(attr::USER_LOGIN) {
        return format!("@{login}");
    }
    if let Some(name) = entity.str(attr::ISSUE_CANONICAL_NAME) {
        let name = name.trim_start_matches("issue:");
        return match entity.str(attr::ISSUE_TITLE) {
            Some(title) => format!("{name} {title}"),
            None => name.to_string(),
        };
    }
    if let Some(id) = entity.int(attr::COMMENT_ID) {
        return format!("comment {id}");
    }
    if let Some(name) = entity.str(attr::REPOSITORY_FULL_NAME) {
        return format!("repository {name}");
    }
    format!("entity {}", entity.id)
}
