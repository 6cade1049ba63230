//! On-disk layout: the shared cache and the per-run workspace.
//!
//! ```text
//! {cache}/
//!   wf-cache/{urlHash}/{revHash}/      repository checkouts
//!   ro-crate-cache/{hash}.crate.zip    RO-Crate archives
//!   wf-inputs/{hash}                   input files
//!   engines/{engine}/{version}/        engine installs
//!   wf-pack/                           engine-derived workflows
//!   containers/docker/                 inspected image manifests
//! {work}/{runId}/
//!   inputs/ intermediate/ outputs/ engineTweaks/
//! ```

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Directory layout of the shared cache.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn workflows(&self) -> PathBuf {
        self.root.join("wf-cache")
    }

    pub fn crates(&self) -> PathBuf {
        self.root.join("ro-crate-cache")
    }

    pub fn inputs(&self) -> PathBuf {
        self.root.join("wf-inputs")
    }

    pub fn container_manifests(&self) -> PathBuf {
        self.root.join("containers").join("docker")
    }

    pub async fn ensure(&self) -> std::io::Result<()> {
        for dir in [self.workflows(), self.crates(), self.inputs()] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// A run's private working area. Removed by [`Workspace::teardown`] unless
/// it was marked to be kept.
#[derive(Debug)]
pub struct Workspace {
    run_id: String,
    root: PathBuf,
    created_at: DateTime<Utc>,
    keep: bool,
}

/// Serializable view of a [`Workspace`] for run reports.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceLayout {
    pub run_id: String,
    pub root: PathBuf,
    pub inputs: PathBuf,
    pub intermediate: PathBuf,
    pub outputs: PathBuf,
    pub engine_tweaks: PathBuf,
    pub created_at: DateTime<Utc>,
    pub kept: bool,
}

impl Workspace {
    /// Create `{work_dir}/{uuid}` with its standard subdirectories.
    pub async fn create(work_dir: &Path) -> std::io::Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let workspace = Self {
            root: work_dir.join(&run_id),
            run_id,
            created_at: Utc::now(),
            keep: false,
        };
        for dir in [
            workspace.inputs_dir(),
            workspace.intermediate_dir(),
            workspace.outputs_dir(),
            workspace.engine_tweaks_dir(),
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        tracing::info!(run_id = %workspace.run_id, path = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn inputs_dir(&self) -> PathBuf {
        self.root.join("inputs")
    }

    pub fn intermediate_dir(&self) -> PathBuf {
        self.root.join("intermediate")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }

    pub fn engine_tweaks_dir(&self) -> PathBuf {
        self.root.join("engineTweaks")
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.keep = keep;
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout {
            run_id: self.run_id.clone(),
            root: self.root.clone(),
            inputs: self.inputs_dir(),
            intermediate: self.intermediate_dir(),
            outputs: self.outputs_dir(),
            engine_tweaks: self.engine_tweaks_dir(),
            created_at: self.created_at,
            kept: self.keep,
        }
    }

    pub async fn teardown(self) -> std::io::Result<()> {
        if self.keep {
            tracing::info!(run_id = %self.run_id, path = %self.root.display(), "Workspace kept");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                tracing::info!(run_id = %self.run_id, "Workspace removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
