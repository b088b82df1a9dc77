// Free-text reference extraction: @mentions, full issue/PR API links, and
// short `#n` references. Pure; nothing here touches the fact store.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::error::MalformedReference;
use crate::facts::{Lookup, attr};
use crate::normalize::issue_canonical_name;
use crate::types::{IssueLocator, RepoName};

static MENTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-zA-Z0-9-]+)").expect("valid mention regex"));

static ISSUE_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/repos/([^/\s]+)/([^/\s]+)/(pulls|issues)/(\d+)").expect("valid issue link regex")
});

static SHORT_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#(\d+)").expect("valid short reference regex"));

/// Reference candidates found in `body`, written in the context of `repo`.
///
/// Duplicates are kept; callers treat the result as a set.
pub fn extract_references(repo: &RepoName, body: &str) -> Vec<Lookup> {
    let mut refs = mentions(body);
    refs.extend(issue_references(repo, body));
    refs
}

/// `[":user/login", login]` for every `@login` token.
pub fn mentions(body: &str) -> Vec<Lookup> {
    MENTION
        .captures_iter(body)
        .map(|cap| Lookup::new(attr::USER_LOGIN, &cap[1]))
        .collect()
}

/// `[":issue/canonical-name", name]` for full API links and short `#n` references.
///
/// Links carry their own repository; short references resolve against `repo`.
pub fn issue_references(repo: &RepoName, body: &str) -> Vec<Lookup> {
    let mut refs = Vec::new();

    for cap in ISSUE_LINK.captures_iter(body) {
        let linked = RepoName::new(&cap[1], &cap[2]);
        match parse_number(&cap[4]) {
            Ok(number) => refs.push(Lookup::new(
                attr::ISSUE_CANONICAL_NAME,
                issue_canonical_name(&linked, number),
            )),
            Err(e) => trace!(%e, "Skipping issue link"),
        }
    }

    for cap in SHORT_REF.captures_iter(body) {
        match parse_number(&cap[1]) {
            Ok(number) => refs.push(Lookup::new(
                attr::ISSUE_CANONICAL_NAME,
                issue_canonical_name(repo, number),
            )),
            Err(e) => trace!(%e, "Skipping short reference"),
        }
    }

    refs
}

/// Parse an issue or pull request API URL into a locator.
///
/// Accepts `.../repos/{owner}/{repo}/issues/{n}` and `.../pulls/{n}`, with or
/// without trailing path segments (`/comments`, ...).
pub fn parse_issue_url(url: &str) -> Result<IssueLocator, MalformedReference> {
    let cap = ISSUE_LINK
        .captures(url)
        .ok_or_else(|| MalformedReference(url.to_string()))?;
    let number = parse_number(&cap[4])?;
    Ok(IssueLocator {
        repo: RepoName::new(&cap[1], &cap[2]),
        number,
        is_pull: &cap[3] == "pulls",
    })
}

fn parse_number(digits: &str) -> Result<u64, MalformedReference> {
    digits
        .parse()
        .map_err(|_| MalformedReference(format!("issue number out of range: {digits}")))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn repo() -> RepoName {
        RepoName::new("ctx", "repo")
    }

    fn as_set(refs: Vec<Lookup>) -> BTreeSet<Lookup> {
        refs.into_iter().collect()
    }

    #[test]
    fn mention_and_short_reference() {
        let refs = as_set(extract_references(&repo(), "see #5 and @bob"));
        let expected: BTreeSet<_> = [
            Lookup::new(attr::USER_LOGIN, "bob"),
            Lookup::new(attr::ISSUE_CANONICAL_NAME, "issue:ctx/repo#5"),
        ]
        .into();
        assert_eq!(refs, expected);
    }

    #[test]
    fn full_link_uses_its_own_repository() {
        let body = "dup of https://api.github.com/repos/other/lib/pulls/77";
        let refs = extract_references(&repo(), body);
        assert_eq!(
            refs,
            vec![Lookup::new(attr::ISSUE_CANONICAL_NAME, "issue:other/lib#77")]
        );
    }

    #[test]
    fn html_links_match_too() {
        let refs = issue_references(&repo(), "https://github.com/repos/a/b/issues/3");
        assert_eq!(
            refs,
            vec![Lookup::new(attr::ISSUE_CANONICAL_NAME, "issue:a/b#3")]
        );
    }

    #[test]
    fn duplicates_are_kept() {
        let refs = mentions("@bob said hi to @bob");
        assert_eq!(refs.len(), 2);
    }

    #[test]
    fn login_charset_stops_at_punctuation() {
        let refs = mentions("thanks @some-user, and @x_y.");
        let logins: Vec<_> = refs.iter().map(|l| l.value.to_string()).collect();
        assert_eq!(logins, vec!["\"some-user\"", "\"x\""]);
    }

    #[test]
    fn empty_body_has_no_references() {
        assert!(extract_references(&repo(), "").is_empty());
    }

    #[test]
    fn overflowing_number_is_skipped() {
        let refs = issue_references(&repo(), "#99999999999999999999999 and #2");
        assert_eq!(
            refs,
            vec![Lookup::new(attr::ISSUE_CANONICAL_NAME, "issue:ctx/repo#2")]
        );
    }

    #[test]
    fn extraction_is_deterministic() {
        let body = "@a #1 https://api.github.com/repos/o/r/issues/9 @b #1";
        assert_eq!(
            as_set(extract_references(&repo(), body)),
            as_set(extract_references(&repo(), body))
        );
    }

    #[test]
    fn parse_issue_and_pull_urls() {
        let issue = parse_issue_url("https://api.github.com/repos/o/r/issues/12").unwrap();
        assert_eq!(issue.repo, RepoName::new("o", "r"));
        assert_eq!(issue.number, 12);
        assert!(!issue.is_pull);

        let pull = parse_issue_url("https://api.github.com/repos/o/r/pulls/4/comments").unwrap();
        assert_eq!(pull.number, 4);
        assert!(pull.is_pull);
    }

    #[test]
    fn parse_rejects_other_urls() {
        assert!(parse_issue_url("https://api.github.com/repos/o/r/releases/1").is_err());
        assert!(parse_issue_url("not a url").is_err());
    }
}
