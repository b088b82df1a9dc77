use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "ghinbox",
    version,
    about = "Keep a local, merged copy of your GitHub notifications"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a process exit code.
///
/// Exit codes:
///   0  — success
///   1  — general/unknown error
///   2  — configuration error
///   3  — workspace not initialized
///   4  — storage error
///   5  — GitHub API error (auth, rate limit, timeout)
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("not initialized") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("storage") || lower.contains("sqlite") || lower.contains("database") {
        4
    } else if lower.contains("github api")
        || lower.contains("rate limit")
        || lower.contains("token")
        || lower.contains("network error")
    {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_not_initialized() {
        let err = anyhow::anyhow!("ghinbox is not initialized in /foo. Run `ghinbox init` first.");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Cannot load config: Config parse error: bad toml");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_storage() {
        let err = anyhow::anyhow!("Storage unavailable: /foo/.ghinbox/ghinbox.db");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_github_api() {
        let err = anyhow::anyhow!("GitHub API error (HTTP 401): Bad credentials");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_missing_token() {
        let err = anyhow::anyhow!("GitHub API auth: token env var GITHUB_TOKEN is not set");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
