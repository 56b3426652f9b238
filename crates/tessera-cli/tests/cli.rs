//! Drives the `tess` binary end to end

use std::fs;
use std::path::Path;
use std::process::{Command, Output};
use tempfile::TempDir;

const PING: &str = "--- Answer with pong\n-- @function\n-- @return string\nfunction ping()\n  return 'pong'\nend\n";

fn tess(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tess"))
        .args(args)
        .arg("--root")
        .arg(root)
        .env_remove("RUST_LOG")
        .env_remove("TESSERA_ROOT")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Stops a daemon left behind by a failing assertion
struct StopOnDrop<'a>(&'a Path);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        let _ = tess(self.0, &["daemon", "stop"]);
    }
}

#[test]
fn test_check_clean_project() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ping.lua"), PING).unwrap();
    let out = tess(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("1 function(s)"));
}

#[test]
fn test_check_broken_project_is_validation_failure() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ping.lua"), "--- @function\nfunction ping(\n").unwrap();
    let out = tess(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn test_bad_arguments_exit_before_connecting() {
    let dir = TempDir::new().unwrap();
    let out = tess(dir.path(), &["invoke", "ping", "--args", "[1]"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(!dir.path().join(".tessera/daemon.json").exists());
}

#[test]
fn test_status_without_daemon() {
    let dir = TempDir::new().unwrap();
    let out = tess(dir.path(), &["daemon", "status"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(stdout(&out).contains("not running"));
}

#[test]
fn test_daemon_round_trip() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ping.lua"), PING).unwrap();
    let _guard = StopOnDrop(dir.path());

    let out = tess(dir.path(), &["daemon", "start"]);
    assert_eq!(out.status.code(), Some(0), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(dir.path().join(".tessera/daemon.json").exists());

    let again = tess(dir.path(), &["daemon", "start"]);
    assert_eq!(again.status.code(), Some(5));

    let out = tess(dir.path(), &["invoke", "ping"]);
    assert_eq!(out.status.code(), Some(0));
    assert_eq!(stdout(&out).trim(), "pong");

    let out = tess(dir.path(), &["invoke", "nope"]);
    assert_eq!(out.status.code(), Some(3));

    let out = tess(dir.path(), &["daemon", "stop"]);
    assert_eq!(out.status.code(), Some(0));
    assert!(!dir.path().join(".tessera/daemon.json").exists());
    assert!(!dir.path().join(".tessera/daemon.sock").exists());
}

#[test]
fn test_on_demand_start_reports_startup_block() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("ping.lua"), "--- @function\nfunction ping(\n").unwrap();
    let _guard = StopOnDrop(dir.path());

    let out = tess(dir.path(), &["invoke", "ping"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(dir.path().join(".tessera/daemon.log").exists());
}
