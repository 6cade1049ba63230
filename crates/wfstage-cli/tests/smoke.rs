//! Smoke tests for the `wfstage` binary.
//!
//! These only exercise paths that need neither the network nor git.

use std::path::Path;
use std::process::Command;

fn wfstage() -> Command {
    Command::new(env!("CARGO_BIN_EXE_wfstage"))
}

/// A config file that keeps every directory under `root`.
fn write_config(root: &Path) -> std::path::PathBuf {
    let path = root.join("config.toml");
    std::fs::write(
        &path,
        format!(
            "[cache]\ndir = \"{}\"\n\n[work]\ndir = \"{}\"\n",
            root.join("cache").display(),
            root.join("work").display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn binary_responds_to_help() {
    let output = wfstage().arg("--help").output().expect("failed to execute wfstage");
    assert!(output.status.success(), "wfstage --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("resolve"), "help output should list resolve subcommand");
    assert!(stdout.contains("stage"), "help output should list stage subcommand");
}

#[test]
fn stage_help_documents_flags() {
    let output = wfstage()
        .args(["stage", "--help"])
        .output()
        .expect("failed to execute wfstage stage --help");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("--credentials"));
    assert!(stdout.contains("--keep-workdir"));
}

#[test]
fn resolve_prints_repository_coordinates() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let workflow = tmp.path().join("workflow.json");
    std::fs::write(
        &workflow,
        r#"{"workflow_id": "https://github.com/nf-core/rnaseq", "version": "3.0"}"#,
    )
    .unwrap();

    let output = wfstage()
        .arg("--config")
        .arg(&config)
        .arg("resolve")
        .arg("--workflow")
        .arg(&workflow)
        .output()
        .expect("failed to execute wfstage resolve");
    assert!(
        output.status.success(),
        "resolve should succeed\nstderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let source: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(source["repo_url"], "https://github.com/nf-core/rnaseq");
    assert_eq!(source["revision"], "3.0");

    // The run's workspace is gone once the command returns.
    let leftovers = std::fs::read_dir(tmp.path().join("work")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn missing_workflow_description_fails_cleanly() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let output = wfstage()
        .arg("--config")
        .arg(&config)
        .args(["resolve", "--workflow"])
        .arg(tmp.path().join("nope.json"))
        .output()
        .expect("failed to execute wfstage resolve");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("nope.json"), "error should name the file: {stderr}");
}

#[test]
fn unknown_input_class_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path());
    let workflow = tmp.path().join("workflow.json");
    std::fs::write(
        &workflow,
        r#"{"workflow_id": "107", "params": {"x": {"c-l-a-s-s": "Directory", "url": "https://a/b"}}}"#,
    )
    .unwrap();

    let output = wfstage()
        .arg("--config")
        .arg(&config)
        .args(["stage", "--workflow"])
        .arg(&workflow)
        .output()
        .expect("failed to execute wfstage stage");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Directory"), "error should name the class: {stderr}");
}
