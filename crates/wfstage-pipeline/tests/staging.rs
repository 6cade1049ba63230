//! Repository caching and full staging runs against local git repositories.
//!
//! Inputs are served by a [`StaticFetcher`]. Tests that need git return
//! early when it is not installed.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use serde_json::json;
use wfstage_core::{EngineKind, InputValue, ParamTree};
use wfstage_pipeline::{
    InputMaterializer, Orchestrator, RemoteCache, RepoCache, SchemeRegistry, StageConfig,
    StageError, StaticFetcher, WorkflowDescription,
};
use wfstage_secrets::MemoryCredentialStore;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|out| out.status.success())
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=wfstage",
            "-c",
            "user.email=wfstage@example.org",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

/// Commit `files` into a fresh repository at `dir` and return its HEAD.
fn init_repo(dir: &Path, files: &[(&str, &str)]) -> String {
    std::fs::create_dir_all(dir).unwrap();
    git(dir, &["init", "-q"]);
    for (name, body) in files {
        let path = dir.join(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "initial"]);
    git(dir, &["rev-parse", "HEAD"])
}

fn file_url(dir: &Path) -> String {
    format!("file://{}", dir.display())
}

fn config(root: &Path) -> StageConfig {
    let mut config = StageConfig::default();
    config.cache.dir = Some(root.join("cache"));
    config.work.dir = Some(root.join("work"));
    config
}

fn inputs_registry() -> Arc<StaticFetcher> {
    Arc::new(
        StaticFetcher::new()
            .with_body("https://data.example/a/reads.fq", "@a\nACGT\n")
            .with_body("https://data.example/b/reads.fq", "@b\nTTGA\n")
            .with_body("https://data.example/ref/genome.fa", ">chr1\nACGT\n"),
    )
}

fn schemes(fetcher: &Arc<StaticFetcher>) -> SchemeRegistry {
    let mut schemes = SchemeRegistry::new();
    schemes.register("https", Arc::<StaticFetcher>::clone(fetcher));
    schemes
}

#[tokio::test]
async fn repository_checkout_is_cached_per_revision() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin");
    let head = init_repo(&origin, &[("main.nf", "workflow {}\n")]);
    let url = file_url(&origin);

    let cache = RepoCache::new(tmp.path().join("wf-cache"));
    let (dir, checkout) = cache.materialize(&url, Some(head.as_str())).await.unwrap();
    assert_eq!(checkout, head);
    assert!(dir.join("main.nf").is_file());
    assert_eq!(dir, cache.slot_path(&url, Some(head.as_str())));

    // With the origin gone, only a cache hit can succeed.
    std::fs::remove_dir_all(&origin).unwrap();
    let (again, checkout_again) = cache.materialize(&url, Some(head.as_str())).await.unwrap();
    assert_eq!(again, dir);
    assert_eq!(checkout_again, head);

    // A different revision is a different slot and needs the remote.
    assert!(cache.materialize(&url, None).await.is_err());
    assert!(!cache.slot_path(&url, None).exists());
}

#[tokio::test]
async fn default_branch_checkout_reports_the_commit() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin");
    let head = init_repo(&origin, &[("wf/align.cwl", "cwlVersion: v1.0\n")]);

    let cache = RepoCache::new(tmp.path().join("wf-cache"));
    let (dir, checkout) = cache.materialize(&file_url(&origin), Some("")).await.unwrap();
    assert_eq!(checkout, head);
    assert_eq!(dir, cache.slot_path(&file_url(&origin), None));
}

#[tokio::test]
async fn colliding_input_names_are_prefixed() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = inputs_registry();
    let cache = RemoteCache::new(
        tmp.path().join("wf-inputs"),
        Arc::new(schemes(&fetcher)),
        Arc::new(MemoryCredentialStore::default()),
    );
    let tree = ParamTree::from_json(&json!({
        "reads": {
            "c-l-a-s-s": "File",
            "url": ["https://data.example/a/reads.fq", "https://data.example/b/reads.fq"]
        },
        "threads": 4
    }))
    .unwrap();

    let dest = tmp.path().join("inputs");
    let (inputs, staged) = InputMaterializer::new(&cache)
        .materialize(&tree, &dest)
        .await
        .unwrap();
    assert_eq!(staged, 2);
    assert_eq!(inputs.len(), 2);

    let reads: Vec<_> = inputs[0].contents().collect();
    assert_eq!(inputs[0].name, "reads");
    assert_eq!(reads.len(), 2);
    assert_eq!(reads[0].local_path, dest.join("reads.fq"));
    assert_eq!(reads[1].local_path, dest.join("2_reads.fq"));
    assert_eq!(reads[1].display_name, "reads.fq");
    assert_eq!(std::fs::read_to_string(&reads[1].local_path).unwrap(), "@b\nTTGA\n");

    assert_eq!(inputs[1].name, "threads");
    assert_eq!(inputs[1].values, vec![InputValue::Scalar(json!(4))]);
}

#[tokio::test]
async fn missing_security_context_stops_staging() {
    let tmp = tempfile::tempdir().unwrap();
    let fetcher = inputs_registry();
    let cache = RemoteCache::new(
        tmp.path().join("wf-inputs"),
        Arc::new(schemes(&fetcher)),
        Arc::new(MemoryCredentialStore::default()),
    );
    let tree = ParamTree::from_json(&json!({
        "reads": {
            "c-l-a-s-s": "File",
            "url": "https://data.example/a/reads.fq",
            "security-context": "ega"
        }
    }))
    .unwrap();

    let err = InputMaterializer::new(&cache)
        .materialize(&tree, &tmp.path().join("inputs"))
        .await
        .unwrap_err();
    assert!(matches!(err, StageError::Fetch(_)));
    assert_eq!(fetcher.calls(), 0);
}

#[tokio::test]
async fn full_run_stages_workflow_and_inputs() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin");
    let head = init_repo(
        &origin,
        &[
            ("main.nf", "workflow { }\n"),
            ("nextflow.config", "manifest.nextflowVersion = '>=20.10.0'\n"),
        ],
    );
    let fetcher = inputs_registry();

    let description = || -> WorkflowDescription {
        serde_json::from_value(json!({
            "workflow_id": file_url(&origin),
            "version": head,
            "params": {
                "reads": {
                    "c-l-a-s-s": "File",
                    "url": ["https://data.example/a/reads.fq", "https://data.example/b/reads.fq"]
                },
                "reference": {
                    "fasta": {"c-l-a-s-s": "File", "url": "https://data.example/ref/genome.fa"}
                },
                "threads": [1, 2]
            }
        }))
        .unwrap()
    };

    let mut orch = Orchestrator::new(description(), config(tmp.path()))
        .await
        .unwrap()
        .with_scheme_registry(schemes(&fetcher));
    let run = orch.stage().await.unwrap();

    assert_eq!(run.source.engine, None);
    assert_eq!(run.workflow.engine.kind, EngineKind::Nextflow);
    assert_eq!(run.workflow.engine.version, "20.10.0");
    assert_eq!(run.workflow.engine.workflow.effective_checkout, head);
    assert!(run.workflow.containers.is_empty());

    let names: Vec<_> = run.inputs.iter().map(|input| input.name.as_str()).collect();
    assert_eq!(names, ["reads", "reference.fasta", "threads"]);
    assert_eq!(run.staged_files, 3);
    assert_eq!(fetcher.calls(), 3);

    let inputs_dir = &run.workspace.inputs;
    assert!(inputs_dir.join("reads.fq").exists());
    assert!(inputs_dir.join("2_reads.fq").exists());
    assert!(inputs_dir.join("genome.fa").exists());

    // Launching is left to an external executor.
    assert!(matches!(orch.execute().await, Err(StageError::Engine(_))));
    let first_root = run.workspace.root.clone();
    orch.finish().await.unwrap();
    assert!(!first_root.exists());

    // A second run over the same cache needs neither the remote repository
    // nor the input server.
    std::fs::remove_dir_all(&origin).unwrap();
    let mut orch = Orchestrator::new(description(), config(tmp.path()))
        .await
        .unwrap()
        .with_scheme_registry(schemes(&fetcher));
    let rerun = orch.stage().await.unwrap();
    assert_ne!(rerun.workspace.run_id, run.workspace.run_id);
    assert_eq!(rerun.workflow.engine.workflow.directory, run.workflow.engine.workflow.directory);
    assert_eq!(fetcher.calls(), 3);
    orch.finish().await.unwrap();
}

#[tokio::test]
async fn repository_without_a_known_workflow_is_rejected() {
    if !git_available() {
        return;
    }
    let tmp = tempfile::tempdir().unwrap();
    let origin = tmp.path().join("origin");
    init_repo(&origin, &[("README.md", "no workflow here\n")]);

    let description: WorkflowDescription = serde_json::from_value(json!({
        "workflow_id": file_url(&origin),
    }))
    .unwrap();
    let mut orch = Orchestrator::new(description, config(tmp.path())).await.unwrap();
    let err = orch.fetch_workflow().await.unwrap_err();
    assert!(matches!(err, StageError::NoEngineRecognized(_)));
    orch.finish().await.unwrap();
}
