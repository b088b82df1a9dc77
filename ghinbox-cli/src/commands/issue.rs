use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;

use ghinbox_core::extract::parse_issue_url;
use ghinbox_core::facts::{Pattern, attr};
use ghinbox_core::normalize::issue_lookup;
use ghinbox_core::types::{Comment, Issue, IssueLocator};

#[derive(Args, Debug)]
pub struct IssueArgs {
    /// `owner/repo#number`, or an issue/pull request API URL
    pub target: String,

    /// Workspace directory (default: current directory)
    #[arg(long, default_value = ".")]
    pub path: PathBuf,

    /// Also fetch and print comments
    #[arg(long)]
    pub comments: bool,

    /// Seconds to wait for GitHub
    #[arg(long, default_value_t = 60)]
    pub timeout: u64,

    /// Print as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: IssueArgs) -> anyhow::Result<()> {
    let locator = parse_target(&args.target)?;
    let session = super::Session::open(&args.path).await?;
    let timeout = Duration::from_secs(args.timeout);

    let mut issue_stream = session.controller.issue(&locator);
    let mut comment_stream = args.comments.then(|| session.controller.comments(&locator));

    let result = async {
        let issue = super::first_fresh(&mut issue_stream, timeout)
            .await?
            .with_context(|| format!("GitHub API returned no record for {locator}"))?;
        let comments = match comment_stream.as_mut() {
            Some(stream) => super::first_fresh(stream, timeout).await?,
            None => Vec::new(),
        };

        if args.json {
            return super::print_json(&serde_json::json!({
                "issue": issue,
                "comments": comments,
            }));
        }
        print_issue(&locator, &issue, &comments);
        print_references(&session, &locator);
        Ok(())
    }
    .await;

    session.controller.shutdown().await;
    result
}

fn parse_target(target: &str) -> anyhow::Result<IssueLocator> {
    if target.starts_with("http://") || target.starts_with("https://") {
        return Ok(parse_issue_url(target)?);
    }
    target
        .parse()
        .with_context(|| format!("Expected owner/repo#number or an API URL, got {target:?}"))
}

fn print_issue(locator: &IssueLocator, issue: &Issue, comments: &[Comment]) {
    let kind = if locator.is_pull { "PR" } else { "Issue" };
    println!("{kind} {locator} [{}] {}", issue.state, issue.title);
    if let Some(user) = &issue.user {
        println!("  opened by @{} on {}", user.login, issue.created_at.format("%Y-%m-%d"));
    }
    if !issue.labels.is_empty() {
        let labels: Vec<_> = issue.labels.iter().map(|l| l.name.as_str()).collect();
        println!("  labels: {}", labels.join(", "));
    }
    if !issue.assignees.is_empty() {
        let who: Vec<_> = issue.assignees.iter().map(|u| format!("@{}", u.login)).collect();
        println!("  assignees: {}", who.join(", "));
    }
    if let Some(body) = issue.body.as_deref().filter(|b| !b.trim().is_empty()) {
        println!();
        println!("{}", body.trim_end());
    }
    for comment in comments {
        println!();
        println!(
            "--- @{} at {}",
            comment.user.login,
            comment.updated_at.format("%Y-%m-%d %H:%M")
        );
        println!("{}", comment.body.trim_end());
    }
}

fn print_references(session: &super::Session, locator: &IssueLocator) {
    let db = session.views.store().snapshot();
    let pattern = Pattern::referenced_by(
        issue_lookup(&locator.repo, locator.number),
        &[attr::ISSUE_REFERENCES],
    );
    let refs = db.query(&pattern);
    if refs.is_empty() {
        return;
    }
    println!();
    println!("References:");
    for entity in refs {
        println!("  {}", super::describe(entity));
    }
}
