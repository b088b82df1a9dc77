use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;

use ghinbox_core::cache::NOTIFICATIONS_KEY;
use ghinbox_core::facts::FactStore;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

pub async fn run(args: StatusArgs) -> anyhow::Result<()> {
    let (dir, config) = super::load_config(&args.path)?;
    let facts = Arc::new(FactStore::github());
    let cache = super::open_cache(&dir, &config, Arc::clone(&facts));

    println!("ghinbox status for {}", dir.display());
    println!();
    match cache.location() {
        Some(path) => println!("  Storage: {}", path.display()),
        None => println!("  Storage: in memory"),
    }
    if cache.is_degraded() {
        println!("  Storage is unavailable; nothing below reflects disk contents.");
    }
    println!();

    println!("  Cached records:");
    for (store, count) in cache.counts().await {
        println!("    {:<20} {count:>6}", store.as_str());
    }
    println!();

    // Loading the stored list normalizes it into the fact store.
    let notifications = cache.merge_notifications(Vec::new()).await;
    let unread = notifications.iter().filter(|n| n.unread).count();
    println!("  Notifications: {} ({unread} unread)", notifications.len());

    let stats = facts.stats();
    println!("  Entities: {} total", stats.total_entities);
    let mut kinds: Vec<_> = stats.by_kind.iter().collect();
    kinds.sort_by(|a, b| b.1.cmp(a.1));
    for (kind, count) in kinds {
        println!("    {kind:<20} {count:>6}");
    }
    println!();

    println!("  Checkpoints:");
    match cache.checkpoint(NOTIFICATIONS_KEY).await {
        Some(at) => println!("    {NOTIFICATIONS_KEY}: {at}"),
        None if config.sync.persist_cursor => println!("    {NOTIFICATIONS_KEY}: (none)"),
        None => println!("    {NOTIFICATIONS_KEY}: (not persisted)"),
    }

    Ok(())
}
