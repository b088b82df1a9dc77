use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tracing::info;

use ghinbox_core::facts::Entity;
use ghinbox_core::types::FullUser;

#[derive(Args, Debug)]
pub struct UserArgs {
    /// GitHub login
    pub login: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Keep running and reprint references whenever they change
    #[arg(long)]
    pub follow: bool,

    /// Seconds to wait for GitHub
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,
}

pub async fn run(args: UserArgs) -> anyhow::Result<()> {
    let session = super::Session::open(&args.path).await?;
    let mut profile = session.controller.user(&args.login);
    let mut notifications = session.controller.notifications();

    let result = async {
        // Stored notifications feed the fact store before the view is built.
        notifications.next().await;
        let user = super::first_fresh(&mut profile, Duration::from_secs(args.timeout)).await?;
        print_profile(&args.login, user.as_ref());

        let mut references = session.views.user_references(&args.login);
        print_references(&references.latest());
        if !args.follow {
            return Ok(());
        }

        loop {
            tokio::select! {
                changed = references.changed() => match changed {
                    Some(refs) => print_references(&refs),
                    None => return Ok(()),
                },
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted, stopping");
                    return Ok(());
                }
            }
        }
    }
    .await;

    session.controller.shutdown().await;
    result
}

fn print_profile(login: &str, user: Option<&FullUser>) {
    let Some(user) = user else {
        println!("@{login} (no profile)");
        return;
    };
    match &user.name {
        Some(name) => println!("@{} ({name})", user.user.login),
        None => println!("@{}", user.user.login),
    }
    if let Some(kind) = &user.kind {
        println!("  type: {kind}");
    }
}

fn print_references(refs: &[Entity]) {
    println!();
    println!("Referenced by {} entities:", refs.len());
    for entity in refs {
        println!("  {}", super::describe(entity));
    }
}
