use std::path::PathBuf;

use anyhow::Context;
use clap::Args;

use ghinbox_core::config::InboxConfig;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Workspace directory (default: current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    let root = std::fs::canonicalize(&args.path)
        .with_context(|| format!("Cannot resolve path: {}", args.path.display()))?;
    let dir = super::ghinbox_dir(&root);
    let config_path = dir.join("config.toml");

    if config_path.exists() && !args.force {
        anyhow::bail!(
            "Config already exists at {} (use --force to overwrite)",
            config_path.display()
        );
    }

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Cannot create {}", dir.display()))?;
    let text = InboxConfig::default()
        .to_toml()
        .context("Cannot serialize default config")?;
    std::fs::write(&config_path, text)
        .with_context(|| format!("Cannot write config: {}", config_path.display()))?;

    println!("Initialized ghinbox in {}", dir.display());
    println!("Set $GITHUB_TOKEN (or github.token_env) before running `ghinbox watch`.");
    Ok(())
}
