#![allow(missing_docs)]

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

fn config_dir(contents: &str) -> TempDir {
    let dir = TempDir::new().expect("tempdir");
    fs::write(dir.path().join("engine.toml"), contents).expect("write config");
    dir
}

#[test]
fn traverse_reports_summary() {
    let dir = config_dir("[execution]\nbatch_size = 8\n");
    let output = cargo_bin_cmd!("mgraph")
        .arg("--config")
        .arg(dir.path().join("engine.toml"))
        .args(["traverse", "--nodes", "200", "--degree", "3", "--seed", "11", "--limit", "5"])
        .output()
        .expect("run mgraph");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).expect("utf8");
    assert!(stdout.contains("nodes: 200"), "{stdout}");
    assert!(stdout.contains("edges: 600"), "{stdout}");
    assert!(stdout.contains("batch size: 8"), "{stdout}");
    assert!(stdout.contains("rows: 5"), "{stdout}");
    assert!(stdout.contains("timed out: false"), "{stdout}");
}

#[test]
fn batch_size_flag_overrides_config() {
    let dir = config_dir("[execution]\nbatch_size = 8\n");
    let output = cargo_bin_cmd!("mgraph")
        .arg("--config")
        .arg(dir.path().join("engine.toml"))
        .args(["traverse", "--nodes", "50", "--batch-size", "3"])
        .output()
        .expect("run mgraph");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("batch size: 3"), "{stdout}");
}

#[test]
fn invalid_config_exits_with_error() {
    let dir = config_dir("[execution]\nbatch_size = 0\n");
    let output = cargo_bin_cmd!("mgraph")
        .arg("--config")
        .arg(dir.path().join("engine.toml"))
        .args(["traverse", "--nodes", "10"])
        .output()
        .expect("run mgraph");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: invalid engine config value for execution.batch_size"), "{stderr}");
}
