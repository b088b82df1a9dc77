use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use ghinbox_core::types::Notification;

#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Exit after the first successful poll
    #[arg(long)]
    pub once: bool,

    /// Seconds to wait for the first successful poll with --once
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Number of notifications to print per update
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Print updates as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: WatchArgs) -> anyhow::Result<()> {
    let session = super::Session::open(&args.path).await?;
    let mut stream = session.controller.notifications();

    let result = if args.once {
        super::first_fresh(&mut stream, Duration::from_secs(args.timeout))
            .await
            .and_then(|list| print_update(&list, &args))
    } else {
        follow(&mut stream, &args).await
    };

    session.controller.shutdown().await;
    result
}

async fn follow(
    stream: &mut ghinbox_core::sync::ResourceStream<Vec<Notification>>,
    args: &WatchArgs,
) -> anyhow::Result<()> {
    loop {
        tokio::select! {
            update = stream.next() => match update {
                Some(list) => print_update(&list, args)?,
                None => return Ok(()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                return Ok(());
            }
        }
    }
}

fn print_update(list: &[Notification], args: &WatchArgs) -> anyhow::Result<()> {
    let shown = &list[..list.len().min(args.limit)];
    if args.json {
        return super::print_json(&shown);
    }

    let unread = list.iter().filter(|n| n.unread).count();
    println!("{} notifications, {unread} unread", list.len());
    for n in shown {
        println!("{}", format_line(n));
    }
    println!();
    Ok(())
}

fn format_line(n: &Notification) -> String {
    format!(
        "{} {}  {:<30} {:<12} {}",
        if n.unread { "*" } else { " " },
        n.updated_at.format("%Y-%m-%d %H:%M"),
        n.repository.full_name,
        n.subject.kind,
        n.subject.title
    )
}
