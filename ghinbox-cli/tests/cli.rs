use assert_cmd::Command;
use predicates::prelude::*;

fn ghinbox() -> Command {
    let mut cmd = Command::cargo_bin("ghinbox").unwrap();
    cmd.env_remove("RUST_LOG");
    cmd
}

#[test]
fn init_writes_default_config() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox()
        .arg("init")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Initialized ghinbox"));

    let text = std::fs::read_to_string(dir.path().join(".ghinbox/config.toml")).unwrap();
    let parsed: toml::Value = toml::from_str(&text).unwrap();
    assert_eq!(parsed["github"]["token_env"].as_str(), Some("GITHUB_TOKEN"));
    assert_eq!(parsed["sync"]["lookback_hours"].as_integer(), Some(24));
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox().arg("init").arg(dir.path()).assert().success();
    ghinbox()
        .arg("init")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    ghinbox()
        .args(["init", "--force"])
        .arg(dir.path())
        .assert()
        .success();
}

#[test]
fn status_requires_init() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox()
        .arg("status")
        .arg(dir.path())
        .assert()
        .code(3)
        .stderr(predicate::str::contains("ghinbox init"));
}

#[test]
fn status_reports_empty_cache() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox().arg("init").arg(dir.path()).assert().success();
    ghinbox()
        .arg("status")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("notifications"))
        .stdout(predicate::str::contains("Notifications: 0 (0 unread)"))
        .stdout(predicate::str::contains("(not persisted)"));
}

#[test]
fn watch_without_token_is_an_api_error() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox().arg("init").arg(dir.path()).assert().success();
    ghinbox()
        .args(["watch", "--once"])
        .arg(dir.path())
        .env_remove("GITHUB_TOKEN")
        .assert()
        .code(5)
        .stderr(predicate::str::contains("GITHUB_TOKEN"));
}

#[test]
fn broken_config_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox().arg("init").arg(dir.path()).assert().success();
    std::fs::write(dir.path().join(".ghinbox/config.toml"), "[sync\n").unwrap();
    ghinbox().arg("status").arg(dir.path()).assert().code(2);
}

#[test]
fn issue_rejects_malformed_target() {
    let dir = tempfile::tempdir().unwrap();
    ghinbox()
        .args(["issue", "not-an-issue", "--path"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("owner/repo#number"));
}
