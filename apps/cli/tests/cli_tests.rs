//! 命令行冒烟测试

use assert_cmd::Command;
use predicates::prelude::*;
use std::net::TcpListener;

fn cli() -> Command {
    Command::cargo_bin("stagelink-cli").unwrap()
}

#[test]
fn test_help_lists_commands() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("probe"))
        .stdout(predicate::str::contains("watch"))
        .stdout(predicate::str::contains("shell"));
}

#[test]
fn test_config_set_and_get() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");

    cli()
        .args(["config", "set", "--server-host", "10.0.0.5", "--server-port", "6000"])
        .arg("--config")
        .arg(&path)
        .assert()
        .success();

    cli()
        .args(["config", "get", "host", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::diff("10.0.0.5\n"));

    cli()
        .args(["config", "get", "port", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::diff("6000\n"));
}

#[test]
fn test_config_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.toml");
    cli()
        .args(["config", "path", "--config"])
        .arg(&path)
        .assert()
        .success()
        .stdout(predicate::str::contains("custom.toml"));
}

#[test]
fn test_command_without_target_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");
    cli()
        .args(["position", "--config"])
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("No target configuration loaded"));
}

#[test]
fn test_probe_unreachable() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing.toml");

    cli()
        .args(["probe", "--host", "127.0.0.1", "--port"])
        .arg(port.to_string())
        .arg("--config")
        .arg(&path)
        .assert()
        .failure()
        .stdout(predicate::str::contains("unreachable"));
}

#[test]
fn test_move_rejects_zero_displacement() {
    cli()
        .args(["move", "--host", "127.0.0.1"])
        .assert()
        .failure();
}
