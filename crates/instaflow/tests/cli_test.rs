#![allow(deprecated)] // TODO: move from Command::cargo_bin to the cargo_bin_cmd! macro

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

const DECLARATIONS: &str = r#"
clusters:
  analytics:
    version: apache-cassandra-3.11.4
    datacenter:
      provider_name: AWS_VPC
      region: US_EAST_1
      size: t3.small
      default_network: 10.224.0.0/16
      racks:
        - { name: a, node_count: 1 }
firewall_rules:
  office:
    cluster: analytics
    network: 203.0.113.0/24
"#;

fn instaflow(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("instaflow").unwrap();
    cmd.current_dir(dir)
        .env_remove("INSTACLUSTR_ACCESS_KEY")
        .env_remove("INSTACLUSTR_SECRET_KEY")
        .env_remove("INSTACLUSTR_URL")
        .env("NO_COLOR", "1");
    cmd
}

fn with_credentials(mut cmd: Command) -> Command {
    cmd.env("INSTACLUSTR_ACCESS_KEY", "user")
        .env("INSTACLUSTR_SECRET_KEY", "secret")
        // Nothing listens here; any request would fail the test
        .env("INSTACLUSTR_URL", "http://127.0.0.1:9/provisioning/v1");
    cmd
}

#[test]
fn test_cli_help() {
    let dir = tempfile::tempdir().unwrap();
    instaflow(dir.path())
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Declarative provisioning"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("import"));
}

#[test]
fn test_cli_version() {
    let dir = tempfile::tempdir().unwrap();
    instaflow(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("instaflow"));
}

#[test]
fn test_state_without_resources() {
    let dir = tempfile::tempdir().unwrap();
    instaflow(dir.path())
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources tracked."));
}

#[test]
fn test_plan_requires_credentials() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("instaflow.yaml"), DECLARATIONS).unwrap();

    instaflow(dir.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("access key must not be empty"));
}

#[test]
fn test_plan_with_empty_state() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("instaflow.yaml"), DECLARATIONS).unwrap();

    with_credentials(instaflow(dir.path()))
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("create cluster analytics"))
        .stdout(predicate::str::contains("2 to create, 0 to replace, 0 to delete"));

    assert!(!dir.path().join(".instaflow").join("state.json").exists());
}

#[test]
fn test_plan_rejects_invalid_declarations() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("broken.yaml"),
        "firewall_rules:\n  office:\n    cluster: missing\n    network: 10.0.0.0/24\n",
    )
    .unwrap();

    with_credentials(instaflow(dir.path()))
        .args(["plan", "--file", "broken.yaml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid declarations"))
        .stderr(predicate::str::contains("undeclared cluster 'missing'"));
}

#[test]
fn test_import_rejects_unknown_kind() {
    let dir = tempfile::tempdir().unwrap();

    with_credentials(instaflow(dir.path()))
        .args(["import", "bucket", "logs", "b-1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown resource kind 'bucket'"));
}

#[test]
fn test_destroy_without_resources() {
    let dir = tempfile::tempdir().unwrap();

    with_credentials(instaflow(dir.path()))
        .arg("destroy")
        .assert()
        .success()
        .stdout(predicate::str::contains("No resources tracked."));
}
