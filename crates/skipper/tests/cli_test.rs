//! Integration tests for the `skipper` CLI binary.
//!
//! Argument parsing, help output, completions, config handling and
//! URL validation, without a live Signal K server.
#![allow(clippy::unwrap_used)]

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ── Helpers ─────────────────────────────────────────────────────────

const NO_HOME: &str = "/tmp/skipper-cli-test-nonexistent";

/// A `skipper` command with every `SKIPPER_*` variable cleared and the
/// config directories pointed at `home`.
fn skipper_in(home: &str) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("skipper");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home)
        .env_remove("SKIPPER_PROFILE")
        .env_remove("SKIPPER_SERVER")
        .env_remove("SKIPPER_TOKEN")
        .env_remove("SKIPPER_OUTPUT")
        .env_remove("SKIPPER_INSECURE")
        .env_remove("SKIPPER_TIMEOUT");
    cmd
}

fn skipper_cmd() -> assert_cmd::Command {
    skipper_in(NO_HOME)
}

fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = skipper_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    skipper_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("Signal K")
            .and(predicate::str::contains("watch"))
            .and(predicate::str::contains("series"))
            .and(predicate::str::contains("paths")),
    );
}

#[test]
fn test_version_flag() {
    skipper_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("skipper"));
}

#[test]
fn test_invalid_subcommand() {
    skipper_cmd()
        .arg("anchor-watch")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("unrecognized subcommand"));
}

#[test]
fn test_watch_requires_a_path() {
    skipper_cmd().arg("watch").assert().failure().code(2);
}

// ── Shell completions ───────────────────────────────────────────────

#[test]
fn test_completions() {
    for shell in ["bash", "zsh", "fish"] {
        skipper_cmd()
            .args(["completions", shell])
            .assert()
            .success()
            .stdout(predicate::str::is_empty().not());
    }
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_status_without_config() {
    let output = skipper_cmd().arg("status").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    let text = combined_output(&output);
    assert!(
        text.contains("No server configured"),
        "Expected config hint in output:\n{text}"
    );
}

#[test]
fn test_unknown_profile() {
    let output = skipper_cmd()
        .args(["--profile", "dinghy", "status"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("dinghy"));
}

#[test]
fn test_config_path() {
    skipper_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_init_then_show() {
    let home = tempfile::tempdir().unwrap();
    let home = home.path().to_str().unwrap().to_owned();

    skipper_in(&home)
        .args([
            "config",
            "init",
            "--server",
            "http://boat.local:3000",
            "--proxy",
        ])
        .assert()
        .success()
        .stderr(predicate::str::contains("Profile 'default' saved"));

    skipper_in(&home)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("default_profile = \"default\"")
                .and(predicate::str::contains("server = \"http://boat.local:3000\""))
                .and(predicate::str::contains("proxy_enabled = true")),
        );

    let output = skipper_in(&home)
        .args(["--output", "json", "config", "show"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        doc["profiles"]["default"]["server"],
        json!("http://boat.local:3000")
    );
}

#[test]
fn test_config_init_rejects_bad_url() {
    let home = tempfile::tempdir().unwrap();
    skipper_in(home.path().to_str().unwrap())
        .args(["config", "init", "--server", "not a url"])
        .assert()
        .failure()
        .code(2);
}

// ── Validate ────────────────────────────────────────────────────────

#[test]
fn test_validate_invalid_url() {
    skipper_cmd()
        .args(["validate", "boat without scheme"])
        .assert()
        .failure()
        .code(2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_validate_signalk_server() {
    let server = MockServer::start().await;
    let host = server.address();
    Mock::given(method("GET"))
        .and(path("/signalk/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "endpoints": { "v1": {
                "version": "1.7.0",
                "signalk-http": format!("http://{host}/signalk/v1/api/"),
                "signalk-ws": format!("ws://{host}/signalk/v1/stream")
            }},
            "server": { "id": "signalk-server-node", "version": "2.8.0" }
        })))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        skipper_cmd()
            .args(["--output", "plain", "validate", &uri])
            .output()
            .unwrap()
    })
    .await
    .unwrap();

    assert!(output.status.success(), "{}", combined_output(&output));
    assert!(String::from_utf8_lossy(&output.stdout).contains(&server.uri()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_validate_forbidden() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/signalk/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let uri = server.uri();
    let output = tokio::task::spawn_blocking(move || {
        skipper_cmd().args(["validate", &uri]).output().unwrap()
    })
    .await
    .unwrap();

    assert_eq!(output.status.code(), Some(3));
}
