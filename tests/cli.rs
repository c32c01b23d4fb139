//! CLI surface smoke tests.

use assert_cmd::Command;

#[test]
fn help_renders() {
    Command::cargo_bin("warelay")
        .expect("binary")
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn unknown_provider_kind_fails_loudly() {
    Command::cargo_bin("warelay")
        .expect("binary")
        .args(["status", "--provider", "signal"])
        .assert()
        .failure();
}

#[test]
fn version_prints() {
    Command::cargo_bin("warelay")
        .expect("binary")
        .arg("--version")
        .assert()
        .success();
}
