// Domain object → fact batch conversion.
//
// Every converter emits the embedded entities first (users, labels, text
// reference stubs) and the primary entity last, with its relationships
// written as identity lookups. Fields absent from the input are left out
// of the facts entirely.

use std::collections::BTreeSet;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::trace;

use crate::extract::{extract_references, parse_issue_url};
use crate::facts::{Fact, Lookup, attr};
use crate::types::{
    Comment, FullUser, Issue, IssueLocator, Label, Notification, RepoName, Repository, User,
};

// ── Canonical names ────────────────────────────────────────────────

/// `issue:{owner}/{repo}#{number}`. Shared by full fetches and body references.
pub fn issue_canonical_name(repo: &RepoName, number: u64) -> String {
    format!("issue:{repo}#{number}")
}

/// `label:{owner}/{repo}#{name}`. Label names are only unique per repository.
pub fn label_canonical_name(repo: &RepoName, name: &str) -> String {
    format!("label:{repo}#{name}")
}

pub fn issue_lookup(repo: &RepoName, number: u64) -> Lookup {
    Lookup::new(attr::ISSUE_CANONICAL_NAME, issue_canonical_name(repo, number))
}

pub fn user_lookup(login: &str) -> Lookup {
    Lookup::new(attr::USER_LOGIN, login)
}

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One stub fact per distinct reference.
fn reference_stubs(refs: &[Lookup]) -> impl Iterator<Item = Fact> {
    refs.iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(Fact::from)
}

// ── Users ──────────────────────────────────────────────────────────

/// Minimal user fact: id, login, avatar.
pub fn user_fact(user: &User) -> Fact {
    Fact::new()
        .with(attr::USER_ID, user.id)
        .with(attr::USER_LOGIN, user.login.as_str())
        .with_opt(attr::USER_AVATAR_URL, user.avatar_url.as_deref())
}

pub fn full_user_facts(user: &FullUser) -> Vec<Fact> {
    vec![
        user_fact(&user.user)
            .with_opt(attr::USER_NAME, user.name.as_deref())
            .with_opt(attr::USER_TYPE, user.kind.as_deref()),
    ]
}

// ── Labels ─────────────────────────────────────────────────────────

pub fn label_fact(repo: &RepoName, label: &Label) -> Fact {
    Fact::new()
        .with(attr::LABEL_ID, label.id)
        .with(
            attr::LABEL_CANONICAL_NAME,
            label_canonical_name(repo, &label.name),
        )
        .with(attr::LABEL_NAME, label.name.as_str())
        .with_opt(attr::LABEL_COLOR, label.color.as_deref())
        .with_opt(attr::LABEL_DESCRIPTION, label.description.as_deref())
}

// ── Issues ─────────────────────────────────────────────────────────

/// Facts for one fetched issue or pull request.
///
/// `locator` addresses the issue; its repository is the context for short
/// `#n` references in the body.
pub fn issue_facts(locator: &IssueLocator, issue: &Issue) -> Vec<Fact> {
    let repo = &locator.repo;
    let mut facts = Vec::new();

    if let Some(author) = &issue.user {
        facts.push(user_fact(author));
    }
    facts.extend(issue.assignees.iter().map(user_fact));
    facts.extend(issue.labels.iter().map(|l| label_fact(repo, l)));

    let refs = issue
        .body
        .as_deref()
        .map(|body| extract_references(repo, body))
        .unwrap_or_default();
    facts.extend(reference_stubs(&refs));

    let is_pull = locator.is_pull
        || parse_issue_url(&issue.url).is_ok_and(|parsed| parsed.is_pull);

    let mut primary = Fact::new()
        .with(attr::ISSUE_ID, issue.id)
        .with(
            attr::ISSUE_CANONICAL_NAME,
            issue_canonical_name(repo, issue.number),
        )
        .with(attr::ISSUE_NUMBER, issue.number)
        .with(attr::ISSUE_TITLE, issue.title.as_str())
        .with(attr::ISSUE_STATE, issue.state.as_str())
        .with_opt(attr::ISSUE_STATE_REASON, issue.state_reason.as_deref())
        .with_opt(attr::ISSUE_BODY, issue.body.as_deref())
        .with(attr::ISSUE_CREATED_AT, timestamp(&issue.created_at))
        .with(attr::ISSUE_UPDATED_AT, timestamp(&issue.updated_at))
        .with(
            attr::ISSUE_REPOSITORY,
            Lookup::new(attr::REPOSITORY_FULL_NAME, repo.to_string()),
        )
        .with_opt(
            attr::ISSUE_USER,
            issue.user.as_ref().map(|u| user_lookup(&u.login)),
        );

    // Only a positive signal is recorded; `/issues/` URLs also serve pull requests.
    if is_pull {
        primary.insert(attr::ISSUE_PULL, true);
    }
    if !issue.assignees.is_empty() {
        let assignees: Vec<Lookup> = issue.assignees.iter().map(|u| user_lookup(&u.login)).collect();
        primary.insert(attr::ISSUE_ASSIGNEES, assignees);
    }
    if !issue.labels.is_empty() {
        let labels: Vec<Lookup> = issue
            .labels
            .iter()
            .map(|l| Lookup::new(attr::LABEL_CANONICAL_NAME, label_canonical_name(repo, &l.name)))
            .collect();
        primary.insert(attr::ISSUE_LABELS, labels);
    }
    if !refs.is_empty() {
        primary.insert(attr::ISSUE_REFERENCES, refs);
    }

    facts.push(primary);
    facts
}

// ── Comments ───────────────────────────────────────────────────────

/// Facts for one comment on the issue at `locator`.
pub fn comment_facts(locator: &IssueLocator, comment: &Comment) -> Vec<Fact> {
    let mut facts = vec![user_fact(&comment.user)];

    let refs = extract_references(&locator.repo, &comment.body);
    facts.extend(reference_stubs(&refs));

    let mut primary = Fact::new()
        .with(attr::COMMENT_ID, comment.id)
        .with(attr::COMMENT_BODY, comment.body.as_str())
        .with(attr::COMMENT_CREATED_AT, timestamp(&comment.created_at))
        .with(attr::COMMENT_UPDATED_AT, timestamp(&comment.updated_at))
        .with(attr::COMMENT_USER, user_lookup(&comment.user.login))
        .with(
            attr::COMMENT_ISSUE,
            issue_lookup(&locator.repo, locator.number),
        );
    if !refs.is_empty() {
        primary.insert(attr::COMMENT_REFERENCES, refs);
    }

    facts.push(primary);
    facts
}

pub fn comments_facts(locator: &IssueLocator, comments: &[Comment]) -> Vec<Fact> {
    comments
        .iter()
        .flat_map(|c| comment_facts(locator, c))
        .collect()
}

// ── Repositories ───────────────────────────────────────────────────

pub fn repository_facts(repo: &Repository) -> Vec<Fact> {
    vec![
        user_fact(&repo.owner),
        Fact::new()
            .with(attr::REPOSITORY_ID, repo.id)
            .with(attr::REPOSITORY_FULL_NAME, repo.full_name.as_str())
            .with(attr::REPOSITORY_NAME, repo.name.as_str())
            .with(attr::REPOSITORY_OWNER, user_lookup(&repo.owner.login)),
    ]
}

// ── Notifications ──────────────────────────────────────────────────

/// Facts for one notification thread.
///
/// The subject becomes an issue stub when its URL addresses an issue or pull
/// request; other subjects (releases, discussions) contribute only title and type.
pub fn notification_facts(notification: &Notification) -> Vec<Fact> {
    let mut facts = repository_facts(&notification.repository);
    let subject = &notification.subject;

    let locator = subject.url.as_deref().and_then(|url| match parse_issue_url(url) {
        Ok(locator) => Some(locator),
        Err(e) => {
            trace!(%e, notification = %notification.id, "Subject is not an issue");
            None
        }
    });

    if let Some(locator) = &locator {
        let mut stub = Fact::new()
            .with(
                attr::ISSUE_CANONICAL_NAME,
                issue_canonical_name(&locator.repo, locator.number),
            )
            .with(attr::ISSUE_NUMBER, locator.number)
            .with(attr::ISSUE_TITLE, subject.title.as_str());
        if locator.is_pull {
            stub.insert(attr::ISSUE_PULL, true);
        }
        facts.push(stub);
    }

    facts.push(
        Fact::new()
            .with(attr::NOTIFICATION_ID, notification.id.as_str())
            .with(attr::NOTIFICATION_REASON, notification.reason.as_str())
            .with(attr::NOTIFICATION_UNREAD, notification.unread)
            .with(
                attr::NOTIFICATION_UPDATED_AT,
                timestamp(&notification.updated_at),
            )
            .with_opt(
                attr::NOTIFICATION_LAST_READ_AT,
                notification.last_read_at.as_ref().map(timestamp),
            )
            .with(attr::NOTIFICATION_TITLE, subject.title.as_str())
            .with(attr::NOTIFICATION_TYPE, subject.kind.as_str())
            .with(
                attr::NOTIFICATION_REPOSITORY,
                Lookup::new(
                    attr::REPOSITORY_FULL_NAME,
                    notification.repository.full_name.as_str(),
                ),
            )
            .with_opt(
                attr::NOTIFICATION_SUBJECT,
                locator.map(|l| issue_lookup(&l.repo, l.number)),
            ),
    );
    facts
}

pub fn notifications_facts(notifications: &[Notification]) -> Vec<Fact> {
    notifications.iter().flat_map(notification_facts).collect()
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::facts::{FactStore, FactValue, Pattern, Scalar};
    use crate::types::NotificationSubject;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, 0, 0).unwrap()
    }

    fn user(login: &str, id: u64) -> User {
        User {
            login: login.into(),
            id,
            avatar_url: None,
            url: None,
        }
    }

    fn locator() -> IssueLocator {
        IssueLocator::new(RepoName::new("o", "r"), 7)
    }

    fn comment(id: u64, author: &User, body: &str) -> Comment {
        Comment {
            id,
            user: author.clone(),
            body: body.into(),
            created_at: at(1),
            updated_at: at(2),
            issue_url: "https://api.github.com/repos/o/r/issues/7".into(),
        }
    }

    fn issue() -> Issue {
        Issue {
            id: 700,
            number: 7,
            title: "Crash on start".into(),
            url: "https://api.github.com/repos/o/r/issues/7".into(),
            user: Some(user("ann", 1)),
            assignees: vec![user("bob", 2)],
            state: "open".into(),
            state_reason: None,
            labels: vec![Label {
                id: 55,
                name: "bug".into(),
                color: Some("d73a4a".into()),
                description: None,
                url: None,
            }],
            body: Some("regressed in #3, cc @carol".into()),
            comments_url: None,
            created_at: at(1),
            updated_at: at(3),
        }
    }

    #[test]
    fn canonical_names() {
        let repo = RepoName::new("o", "r");
        assert_eq!(issue_canonical_name(&repo, 12), "issue:o/r#12");
        assert_eq!(label_canonical_name(&repo, "good first issue"), "label:o/r#good first issue");
    }

    #[test]
    fn user_fact_skips_missing_avatar() {
        let fact = user_fact(&user("bob", 2));
        assert!(fact.get(attr::USER_AVATAR_URL).is_none());
        assert_eq!(
            fact.get(attr::USER_LOGIN),
            Some(&FactValue::Scalar(Scalar::from("bob")))
        );
    }

    #[test]
    fn issue_emits_embedded_entities_before_primary() {
        let facts = issue_facts(&locator(), &issue());
        let primary = facts.last().unwrap();
        assert!(primary.get(attr::ISSUE_ID).is_some());
        assert!(primary.get(attr::ISSUE_PULL).is_none());
        assert!(primary.get(attr::ISSUE_STATE_REASON).is_none());

        let store = FactStore::github();
        let report = store.transact(facts);
        assert!(report.is_clean(), "{:?}", report.violations);

        let db = store.snapshot();
        let issue = db.pull(&issue_lookup(&RepoName::new("o", "r"), 7)).unwrap();
        assert_eq!(issue.str(attr::ISSUE_TITLE), Some("Crash on start"));
        assert_eq!(issue.references(attr::ISSUE_LABELS).len(), 1);
        assert_eq!(issue.references(attr::ISSUE_REFERENCES).len(), 2);

        let carol = db.resolve(&user_lookup("carol")).unwrap();
        assert!(issue.refers_to(attr::ISSUE_REFERENCES, carol));
        let label = db
            .pull(&Lookup::new(attr::LABEL_CANONICAL_NAME, "label:o/r#bug"))
            .unwrap();
        assert_eq!(label.str(attr::LABEL_COLOR), Some("d73a4a"));
    }

    #[test]
    fn pull_flag_comes_from_locator() {
        let mut loc = locator();
        loc.is_pull = true;
        let facts = issue_facts(&loc, &issue());
        assert_eq!(
            facts.last().unwrap().get(attr::ISSUE_PULL),
            Some(&FactValue::Scalar(Scalar::Bool(true)))
        );
    }

    #[test]
    fn shared_mentions_resolve_to_one_user() {
        let carl = user("carl", 9);
        let comments = [
            comment(10, &carl, "ping @carol"),
            comment(11, &carl, "@carol again"),
        ];
        let store = FactStore::github();
        store.transact(comments_facts(&locator(), &comments));

        let db = store.snapshot();
        let carol = db.query(&Pattern::eq(attr::USER_LOGIN, "carol"));
        assert_eq!(carol.len(), 1);
        let carol = carol[0].id;

        let referencing = db.query(&Pattern::referencing(carol, &[attr::COMMENT_REFERENCES]));
        let ids: Vec<_> = referencing
            .iter()
            .filter_map(|e| e.int(attr::COMMENT_ID))
            .collect();
        assert_eq!(ids, vec![10, 11]);
    }

    #[test]
    fn comment_links_to_its_issue() {
        let store = FactStore::github();
        store.transact(comment_facts(&locator(), &comment(10, &user("carl", 9), "lgtm")));
        let db = store.snapshot();
        let comment = db.pull(&Lookup::new(attr::COMMENT_ID, 10u64)).unwrap();
        let issue = db.resolve(&issue_lookup(&RepoName::new("o", "r"), 7)).unwrap();
        assert_eq!(comment.reference(attr::COMMENT_ISSUE), Some(issue));
        assert!(comment.get(attr::COMMENT_REFERENCES).is_none());
    }

    fn notification(subject_url: Option<&str>) -> Notification {
        Notification {
            id: "n1".into(),
            unread: true,
            reason: "mention".into(),
            updated_at: at(4),
            last_read_at: None,
            subject: NotificationSubject {
                title: "Crash on start".into(),
                url: subject_url.map(str::to_string),
                latest_comment_url: None,
                kind: "Issue".into(),
            },
            repository: Repository {
                id: 1,
                name: "r".into(),
                full_name: "o/r".into(),
                owner: user("o", 100),
            },
        }
    }

    #[test]
    fn notification_with_issue_subject() {
        let store = FactStore::github();
        let report = store.transact(notification_facts(&notification(Some(
            "https://api.github.com/repos/o/r/issues/7",
        ))));
        assert!(report.is_clean());

        let db = store.snapshot();
        let n = db.pull(&Lookup::new(attr::NOTIFICATION_ID, "n1")).unwrap();
        let subject = db.entity(n.reference(attr::NOTIFICATION_SUBJECT).unwrap()).unwrap();
        assert_eq!(subject.int(attr::ISSUE_NUMBER), Some(7));
        assert!(subject.get(attr::ISSUE_ID).is_none(), "no fabricated id");

        let repo = db.entity(n.reference(attr::NOTIFICATION_REPOSITORY).unwrap()).unwrap();
        let owner = db.entity(repo.reference(attr::REPOSITORY_OWNER).unwrap()).unwrap();
        assert_eq!(owner.str(attr::USER_LOGIN), Some("o"));
    }

    #[test]
    fn notification_without_subject_url() {
        let facts = notification_facts(&notification(None));
        let primary = facts.last().unwrap();
        assert!(primary.get(attr::NOTIFICATION_SUBJECT).is_none());
        assert!(primary.get(attr::NOTIFICATION_LAST_READ_AT).is_none());
        assert!(facts.iter().all(|f| f.get(attr::ISSUE_CANONICAL_NAME).is_none()));
    }

    #[test]
    fn later_issue_fetch_fills_notification_stub() {
        let store = FactStore::github();
        store.transact(notification_facts(&notification(Some(
            "https://api.github.com/repos/o/r/issues/7",
        ))));
        let stub = store
            .snapshot()
            .resolve(&issue_lookup(&RepoName::new("o", "r"), 7))
            .unwrap();

        store.transact(issue_facts(&locator(), &issue()));
        let db = store.snapshot();
        let full = db.pull(&Lookup::new(attr::ISSUE_ID, 700u64)).unwrap();
        assert_eq!(full.id, stub);
    }
}
