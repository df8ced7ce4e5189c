//! End-to-end tests for the `qclient` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn qclient() -> Command {
    let mut cmd = Command::cargo_bin("qclient").unwrap();
    cmd.env_remove("QCLIENT_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    qclient()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("create"))
        .stdout(predicate::str::contains("receive"));
}

#[test]
fn test_create_prints_queue_reference_as_json() {
    qclient()
        .args(["--driver", "memory", "create", "orders"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"locator\": \"memory://orders\""));
}

#[test]
fn test_receive_from_missing_queue_exits_with_queue_code() {
    // Each process has its own in-memory backend
    qclient()
        .args(["--driver", "memory", "receive", "orders"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("orders"));
}

#[test]
fn test_unknown_driver_exits_with_configuration_code() {
    qclient()
        .args(["--driver", "kafka", "exists", "orders"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("kafka"));
}

#[test]
fn test_empty_queue_name_exits_with_argument_code() {
    qclient()
        .args(["--driver", "memory", "exists", ""])
        .assert()
        .code(3);
}

#[test]
fn test_missing_subcommand_is_usage_error() {
    qclient().assert().failure();
}
