use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn whiskey(work_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_whiskey"))
        .args(args)
        .current_dir(work_dir)
        .output()
        .unwrap()
}

fn write_config(work: &Path, base: &Path, build: &str) {
    let yaml = format!(
        "deploy_base: {}\nshell: /bin/sh\ncopy:\n  - mkdir -p $DEPLOY_DIR\nbuild:\n  - {}\n",
        base.display(),
        build
    );
    fs::write(work.join("deploy.yml"), yaml).unwrap();
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn remote_mode_reports_release() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    write_config(work.path(), base.path(), "touch $DEPLOY_DIR/ok");

    let output = whiskey(work.path(), &["--remote", "deploy.yml"]);

    assert_eq!(output.status.code(), Some(0));
    let json = stdout_json(&output);
    assert_eq!(json["success"], true);
    assert!(json["data"]["releaseId"].is_string());
    assert!(base.path().join("Current/ok").is_file());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Whiskey Deploy"));
}

#[test]
fn phase_exit_code_becomes_process_exit_code() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    write_config(work.path(), base.path(), "exit 3");

    let output = whiskey(work.path(), &["--remote", "deploy.yml"]);

    assert_eq!(output.status.code(), Some(3));
    let json = stdout_json(&output);
    assert_eq!(json["success"], false);
    assert_eq!(json["error"]["code"], "phase.command_failed");
    assert_eq!(json["error"]["details"]["phase"], "build");
    assert!(fs::symlink_metadata(base.path().join("Current")).is_err());
}

#[test]
fn unreadable_config_is_config_error() {
    let work = TempDir::new().unwrap();

    let output = whiskey(work.path(), &["--remote", "missing.yml"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["code"], "config.unreadable");
}

#[test]
fn orchestrator_without_targets_is_config_error() {
    let work = TempDir::new().unwrap();
    let base = TempDir::new().unwrap();
    write_config(work.path(), base.path(), "\"true\"");

    let output = whiskey(work.path(), &["deploy.yml"]);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout_json(&output)["error"]["code"], "config.missing_key");
}

#[test]
fn missing_config_argument_is_usage_error() {
    let work = TempDir::new().unwrap();

    let output = whiskey(work.path(), &[]);

    assert_eq!(output.status.code(), Some(2));
}
