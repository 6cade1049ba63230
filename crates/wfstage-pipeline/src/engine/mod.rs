pub mod cwl;
pub mod nextflow;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;
use wfstage_core::{
    Deadline, EngineKind, EngineVersion, Fingerprint, LocalWorkflow, MaterializedEngine,
    MaterializedInput, MaterializedWorkflow,
};

use crate::command::CommandError;
use crate::error::StageError;

pub use cwl::CwlEngine;
pub use nextflow::NextflowEngine;

/// Where engines are provisioned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    #[default]
    Local,
    Docker,
}

impl fmt::Display for EngineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineMode::Local => f.write_str("local"),
            EngineMode::Docker => f.write_str("docker"),
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unsupported engine mode {mode} for {engine} engine")]
    UnsupportedEngineMode { engine: EngineKind, mode: EngineMode },

    #[error("{engine}: {what} failed ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        engine: EngineKind,
        what: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("{engine} workflow {} has not been materialized", path.display())]
    NotMaterialized { engine: EngineKind, path: PathBuf },

    #[error("launching {0} workflows is not supported")]
    LaunchUnsupported(EngineKind),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// What engines need from the local setup.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Root of the shared cache; engines keep their installs under
    /// `engines/` and their derived workflows under `wf-pack/`.
    pub cache_dir: PathBuf,
    pub mode: EngineMode,
    pub python_command: String,
    pub cwl_version: String,
    pub nextflow_version: String,
    pub deadline: Deadline,
}

impl EngineSettings {
    pub fn engines_dir(&self, kind: EngineKind) -> PathBuf {
        self.cache_dir.join("engines").join(kind.to_string())
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.cache_dir.join("wf-pack")
    }
}

/// One workflow language.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait WorkflowEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// The engine version needed to run `workflow`, or `None` when this
    /// engine does not recognize it.
    fn identify<'a>(
        &'a self,
        workflow: &'a LocalWorkflow,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EngineVersion>, EngineError>> + Send + 'a>>;

    /// Ensure `version` is installed. Returns the effective version and an
    /// optional fingerprint of the install.
    fn materialize_engine_version<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(EngineVersion, Option<Fingerprint>), EngineError>> + Send + 'a>>;

    /// Prepare the workflow for launch. The returned workflow has no
    /// containers yet; the tags are the container images it references.
    fn materialize_workflow<'a>(
        &'a self,
        engine: &'a MaterializedEngine,
    ) -> Pin<Box<dyn Future<Output = Result<(MaterializedWorkflow, Vec<String>), EngineError>> + Send + 'a>>;

    fn launch_workflow<'a>(
        &'a self,
        workflow: &'a MaterializedWorkflow,
        inputs: &'a [MaterializedInput],
        outputs: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>>;
}

/// Engines in identification priority order.
pub struct EngineSet {
    engines: Vec<Box<dyn WorkflowEngine>>,
}

impl EngineSet {
    pub fn new(engines: Vec<Box<dyn WorkflowEngine>>) -> Self {
        Self { engines }
    }

    /// Nextflow first, then CWL.
    pub fn standard(settings: &EngineSettings) -> Self {
        Self::new(vec![
            Box::new(NextflowEngine::new(settings)),
            Box::new(CwlEngine::new(settings.clone())),
        ])
    }

    pub fn get(&self, kind: EngineKind) -> Option<&dyn WorkflowEngine> {
        self.engines
            .iter()
            .find(|engine| engine.kind() == kind)
            .map(|engine| engine.as_ref())
    }

    pub fn kinds(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|engine| engine.kind()).collect()
    }

    /// Find the engine for `workflow`.
    ///
    /// With `pinned`, only that engine is asked. Otherwise the first engine
    /// that recognizes the workflow wins.
    pub async fn identify(
        &self,
        workflow: &LocalWorkflow,
        pinned: Option<EngineKind>,
        repo: &str,
    ) -> Result<(EngineKind, EngineVersion), StageError> {
        if let Some(kind) = pinned {
            let engine = self.get(kind).ok_or_else(|| StageError::EngineDidNotRecognize {
                engine: kind,
                repo: repo.into(),
            })?;
            return match engine.identify(workflow).await? {
                Some(version) => {
                    tracing::info!(engine = %kind, version = %version, "Engine identified workflow");
                    Ok((kind, version))
                }
                None => Err(StageError::EngineDidNotRecognize {
                    engine: kind,
                    repo: repo.into(),
                }),
            };
        }

        for engine in &self.engines {
            tracing::debug!(engine = %engine.kind(), "Asking engine to identify workflow");
            if let Some(version) = engine.identify(workflow).await? {
                tracing::info!(engine = %engine.kind(), version = %version, "Engine identified workflow");
                return Ok((engine.kind(), version));
            }
        }

        Err(StageError::NoEngineRecognized(repo.into()))
    }
}

/// File extension of `path`, lowercased.
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
}
