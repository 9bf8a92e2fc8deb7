//! Command-line surface of the `hermine` binary

use assert_cmd::Command;
use predicates::prelude::*;

fn hermine() -> Command {
    let mut cmd = Command::cargo_bin("hermine").expect("binary is built");
    for var in ["HERMINE_ACCOUNT_ID", "HERMINE_AGENT_SLUG", "HERMINE_ENDPOINT"] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    hermine()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("chat"))
        .stdout(predicate::str::contains("ask"))
        .stdout(predicate::str::contains("theme"));
}

#[test]
fn test_ask_requires_a_message() {
    hermine()
        .arg("ask")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<MESSAGE>"));
}

#[test]
fn test_missing_account_fails_validation() {
    hermine()
        .args(["--config", "does-not-exist.yaml", "theme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("account_id cannot be empty"));
}

#[test]
fn test_theme_against_unreachable_backend_fails() {
    hermine()
        .args([
            "--config",
            "does-not-exist.yaml",
            "theme",
            "--endpoint",
            "http://127.0.0.1:9",
            "--account-id",
            "acme",
            "--agent-slug",
            "support",
        ])
        .assert()
        .failure();
}
