use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use url::Url;
use wfstage_core::{
    Deadline, EngineKind, EngineVersion, LocalWorkflow, MaterializedEngine, MaterializedInput,
    MaterializedWorkflow, ParamTree, WorkflowReference,
};
use wfstage_secrets::{CredentialStore, MemoryCredentialStore};

use crate::config::{StageConfig, WorkflowDescription};
use crate::container::{ContainerFactory, ContainerNaming, DockerContainerFactory};
use crate::engine::{EngineSet, EngineSettings, WorkflowEngine};
use crate::error::StageError;
use crate::fetch::{RemoteCache, SchemeRegistry};
use crate::inputs::InputMaterializer;
use crate::repo::RepoCache;
use crate::trs::{CRATE_EXTENSION, ResolvedWorkflow, TrsResolver};
use crate::workspace::{CacheLayout, Workspace, WorkspaceLayout};

/// Where the workflow's source lives. `engine` is known up front only when
/// it came from a registry (or was pinned by the caller).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowSource {
    pub engine: Option<EngineKind>,
    pub repo_url: String,
    pub revision: Option<String>,
    pub relative_path: Option<String>,
}

impl From<ResolvedWorkflow> for WorkflowSource {
    fn from(resolved: ResolvedWorkflow) -> Self {
        Self {
            engine: Some(resolved.engine),
            repo_url: resolved.repo_url,
            revision: resolved.repo_revision,
            relative_path: resolved.relative_path,
        }
    }
}

/// Everything a downstream executor needs, as produced by
/// [`Orchestrator::stage`].
#[derive(Debug, Clone, Serialize)]
pub struct StagedRun {
    pub workspace: WorkspaceLayout,
    pub reference: WorkflowReference,
    pub source: WorkflowSource,
    pub workflow: MaterializedWorkflow,
    pub inputs: Vec<MaterializedInput>,
    pub staged_files: usize,
}

/// One staging run: resolve -> fetch repository -> identify engine ->
/// materialize engine -> materialize workflow and containers -> stage
/// inputs.
///
/// Each step runs the steps before it when they have not happened yet, and
/// is a no-op when it already ran. Any failure aborts the run; nothing is
/// retried.
pub struct Orchestrator {
    reference: WorkflowReference,
    params: ParamTree,
    outputs: serde_json::Value,
    trs_endpoint: String,
    config: StageConfig,
    cache: CacheLayout,
    workspace: Workspace,
    schemes: Arc<SchemeRegistry>,
    credentials: Arc<dyn CredentialStore>,
    engines: EngineSet,
    containers: Box<dyn ContainerFactory>,
    root: Deadline,

    source: Option<WorkflowSource>,
    local: Option<LocalWorkflow>,
    identified: Option<(EngineKind, EngineVersion)>,
    engine: Option<MaterializedEngine>,
    workflow: Option<MaterializedWorkflow>,
    inputs: Option<(Vec<MaterializedInput>, usize)>,

    /// Temporary work root when none is configured.
    work_scratch: Option<TempDir>,
    /// Temporary cache root when none is configured. Dropped last.
    cache_scratch: Option<TempDir>,
}

impl Orchestrator {
    /// Prepare a run: validate the parameters, lay out the cache and create
    /// the run's workspace. Nothing is fetched yet.
    pub async fn new(description: WorkflowDescription, config: StageConfig) -> Result<Self, StageError> {
        let params = ParamTree::from_json(&description.params)?;

        let (cache_root, cache_scratch) = match &config.cache.dir {
            Some(dir) => (dir.clone(), None),
            None => scratch_dir("wfstage-cache-")?,
        };
        let (work_root, work_scratch) = match &config.work.dir {
            Some(dir) => (dir.clone(), None),
            None => scratch_dir("wfstage-work-")?,
        };

        // Staged inputs are symlinks into the cache, so both roots must not
        // depend on the process's working directory.
        let cache_root = std::path::absolute(cache_root)?;
        let work_root = std::path::absolute(work_root)?;

        let cache = CacheLayout::new(cache_root);
        cache.ensure().await?;
        tokio::fs::create_dir_all(&work_root).await?;
        let mut workspace = Workspace::create(&work_root).await?;
        workspace.set_keep(config.work.keep);

        let root = Deadline::unbounded();
        let engines = EngineSet::standard(&engine_settings(&config, &cache, &root));
        let containers = Box::new(
            DockerContainerFactory::new(&config.tools.docker_command)
                .with_manifests_dir(cache.container_manifests())
                .with_deadline(root.with_timeout(config.timeouts.container())),
        );

        let reference = description.reference();
        let trs_endpoint = description
            .trs_endpoint
            .clone()
            .filter(|endpoint| !endpoint.is_empty())
            .unwrap_or_else(|| config.trs.endpoint.clone());

        tracing::info!(
            run_id = %workspace.run_id(),
            workflow = %reference.id,
            version = ?reference.version,
            cache = %cache.root().display(),
            "Run prepared"
        );

        Ok(Self {
            reference,
            params,
            outputs: description.outputs,
            trs_endpoint,
            config,
            cache,
            workspace,
            schemes: Arc::new(SchemeRegistry::with_defaults()),
            credentials: Arc::new(MemoryCredentialStore::default()),
            engines,
            containers,
            root,
            source: None,
            local: None,
            identified: None,
            engine: None,
            workflow: None,
            inputs: None,
            work_scratch,
            cache_scratch,
        })
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialStore>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Replace the scheme handlers used for registry lookups, RO-Crates and
    /// inputs.
    pub fn with_scheme_registry(mut self, schemes: SchemeRegistry) -> Self {
        self.schemes = Arc::new(schemes);
        self
    }

    pub fn with_engines(mut self, engines: EngineSet) -> Self {
        self.engines = engines;
        self
    }

    pub fn with_container_factory(mut self, containers: Box<dyn ContainerFactory>) -> Self {
        self.containers = containers;
        self
    }

    /// Settings the bundled engines are built from, bound to this run's
    /// cancellation token.
    pub fn engine_settings(&self) -> EngineSettings {
        engine_settings(&self.config, &self.cache, &self.root)
    }

    /// Cancelling this token interrupts whichever external call is in
    /// flight and makes every later one fail immediately.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.root.cancellation().clone()
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn cache_layout(&self) -> &CacheLayout {
        &self.cache
    }

    pub fn set_keep(&mut self, keep: bool) {
        self.workspace.set_keep(keep);
    }

    /// Work out where the workflow's source lives. A reference whose id is
    /// an absolute URL is taken as a git repository (its version being the
    /// branch, tag or commit); anything else is looked up in the registry.
    pub async fn resolve(&mut self) -> Result<WorkflowSource, StageError> {
        if let Some(source) = &self.source {
            return Ok(source.clone());
        }

        let source = if Url::parse(&self.reference.id).is_ok() {
            let engine = match self.reference.descriptor_type.as_deref().filter(|t| !t.is_empty()) {
                Some(tag) => Some(
                    EngineKind::from_trs_descriptor(tag)
                        .ok_or_else(|| StageError::UnknownDescriptorType(tag.into()))?,
                ),
                None => None,
            };
            tracing::info!(repo = %self.reference.id, "Workflow id is a repository URL, skipping registry");
            WorkflowSource {
                engine,
                repo_url: self.reference.id.clone(),
                revision: self.reference.requested_version().map(String::from),
                relative_path: None,
            }
        } else {
            self.resolver()?.resolve(&self.reference).await?.into()
        };

        self.source = Some(source.clone());
        Ok(source)
    }

    /// Check out the repository and pick the engine that recognizes it.
    pub async fn fetch_workflow(&mut self) -> Result<LocalWorkflow, StageError> {
        if let Some(local) = &self.local {
            return Ok(local.clone());
        }
        let source = self.resolve().await?;

        let repos = RepoCache::new(self.cache.workflows())
            .with_git(&self.config.tools.git_command)
            .with_deadline(self.root.with_timeout(self.config.timeouts.git()));
        let (directory, effective_checkout) =
            repos.materialize(&source.repo_url, source.revision.as_deref()).await?;
        tracing::info!(
            repo = %source.repo_url,
            checkout = %effective_checkout,
            path = %directory.display(),
            "Workflow repository materialized"
        );

        let relative_path = source.relative_path.as_deref().filter(|rel| !rel.is_empty());
        if let Some(rel) = relative_path {
            if !tokio::fs::try_exists(directory.join(rel)).await? {
                return Err(StageError::RelativePathMissing {
                    relative: rel.into(),
                    directory,
                });
            }
        }

        let local = LocalWorkflow {
            directory,
            relative_path: relative_path.map(PathBuf::from),
            effective_checkout,
        };
        let identified = self
            .engines
            .identify(&local, source.engine, &source.repo_url)
            .await?;

        self.identified = Some(identified);
        self.local = Some(local.clone());
        Ok(local)
    }

    /// Provision the identified engine at the version the workflow needs.
    pub async fn setup_engine(&mut self) -> Result<MaterializedEngine, StageError> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }
        let local = self.fetch_workflow().await?;
        let (kind, version) = self
            .identified
            .clone()
            .ok_or(StageError::StepNotReady("fetch_workflow"))?;

        let (version, fingerprint) = self
            .engine_for(kind)?
            .materialize_engine_version(&version)
            .await?;
        tracing::info!(engine = %kind, version = %version, "Engine materialized");

        let engine = MaterializedEngine {
            kind,
            version,
            fingerprint,
            workflow: local,
        };
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Let the engine prepare the workflow, then make the containers it
    /// references available.
    pub async fn materialize_workflow(&mut self) -> Result<MaterializedWorkflow, StageError> {
        if let Some(workflow) = &self.workflow {
            return Ok(workflow.clone());
        }
        let engine = self.setup_engine().await?;

        let (mut workflow, tags) = self
            .engine_for(engine.kind)?
            .materialize_workflow(&engine)
            .await?;
        if !tags.is_empty() {
            workflow.containers = self
                .containers
                .materialize_containers(&tags, ContainerNaming::default())
                .await?;
        }
        tracing::info!(
            engine = %engine.kind,
            entry = %workflow.entry_point.display(),
            containers = workflow.containers.len(),
            "Workflow materialized"
        );

        self.workflow = Some(workflow.clone());
        Ok(workflow)
    }

    /// Fetch every declared input into the shared cache and link it into
    /// the run's `inputs/` directory. Returns the flattened inputs and the
    /// number of staged files.
    pub async fn materialize_inputs(&mut self) -> Result<(Vec<MaterializedInput>, usize), StageError> {
        if let Some(inputs) = &self.inputs {
            return Ok(inputs.clone());
        }
        let cache = RemoteCache::new(
            self.cache.inputs(),
            Arc::clone(&self.schemes),
            Arc::clone(&self.credentials),
        )
        .with_deadline(self.root.with_timeout(self.config.timeouts.fetch()));

        let staged = InputMaterializer::new(&cache)
            .materialize(&self.params, &self.workspace.inputs_dir())
            .await?;
        self.inputs = Some(staged.clone());
        Ok(staged)
    }

    /// Run every step and report the result.
    pub async fn stage(&mut self) -> Result<StagedRun, StageError> {
        let source = self.resolve().await?;
        let workflow = self.materialize_workflow().await?;
        let (inputs, staged_files) = self.materialize_inputs().await?;
        tracing::info!(
            run_id = %self.workspace.run_id(),
            engine = %workflow.engine.kind,
            inputs = inputs.len(),
            files = staged_files,
            "Run staged"
        );

        Ok(StagedRun {
            workspace: self.workspace.layout(),
            reference: self.reference.clone(),
            source,
            workflow,
            inputs,
            staged_files,
        })
    }

    /// Hand the staged workflow to its engine.
    pub async fn execute(&self) -> Result<(), StageError> {
        let workflow = self
            .workflow
            .as_ref()
            .ok_or(StageError::StepNotReady("materialize_workflow"))?;
        let (inputs, _) = self
            .inputs
            .as_ref()
            .ok_or(StageError::StepNotReady("materialize_inputs"))?;

        self.engine_for(workflow.engine.kind)?
            .launch_workflow(workflow, inputs, &self.outputs)
            .await?;
        Ok(())
    }

    /// End the run: remove the workspace unless it is kept, and any
    /// temporary cache.
    pub async fn finish(self) -> Result<(), StageError> {
        let kept = self.workspace.is_kept();
        self.workspace.teardown().await?;
        if let Some(work) = self.work_scratch {
            if kept {
                let path = work.keep();
                tracing::info!(path = %path.display(), "Temporary work directory kept");
            }
        }
        drop(self.cache_scratch);
        Ok(())
    }

    fn engine_for(&self, kind: EngineKind) -> Result<&dyn WorkflowEngine, StageError> {
        self.engines
            .get(kind)
            .ok_or_else(|| StageError::EngineDidNotRecognize {
                engine: kind,
                repo: self
                    .source
                    .as_ref()
                    .map(|source| source.repo_url.clone())
                    .unwrap_or_default(),
            })
    }

    fn resolver(&self) -> Result<TrsResolver, StageError> {
        let fetch_deadline = self.root.with_timeout(self.config.timeouts.fetch());
        let crates = RemoteCache::new(
            self.cache.crates(),
            Arc::clone(&self.schemes),
            Arc::clone(&self.credentials),
        )
        .with_extension(CRATE_EXTENSION)
        .with_deadline(fetch_deadline.clone());

        Ok(TrsResolver::new(&self.trs_endpoint, Arc::clone(&self.schemes), crates)?
            .with_deadline(fetch_deadline))
    }
}

fn engine_settings(config: &StageConfig, cache: &CacheLayout, root: &Deadline) -> EngineSettings {
    EngineSettings {
        cache_dir: cache.root().to_path_buf(),
        mode: config.engines.mode,
        python_command: config.tools.python_command.clone(),
        cwl_version: config.engines.cwl_version.clone(),
        nextflow_version: config.engines.nextflow_version.clone(),
        deadline: root.with_timeout(config.timeouts.engine()),
    }
}

fn scratch_dir(prefix: &str) -> std::io::Result<(PathBuf, Option<TempDir>)> {
    let dir = tempfile::Builder::new().prefix(prefix).tempdir()?;
    Ok((dir.path().to_path_buf(), Some(dir)))
}
