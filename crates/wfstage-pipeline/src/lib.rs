//! The staging pipeline: registry resolution, RO-Crate parsing, the
//! content-addressed repository and object caches, engine identification
//! and provisioning, container materialization and input staging, composed
//! by [`Orchestrator`].

pub mod command;
pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod inputs;
pub mod orchestrator;
pub mod repo;
pub mod rocrate;
pub mod trs;
pub mod workspace;

pub use config::{StageConfig, WorkflowDescription};
pub use container::{ContainerFactory, ContainerNaming, DockerContainerFactory};
pub use engine::{EngineMode, EngineSet, EngineSettings, WorkflowEngine};
pub use error::StageError;
pub use fetch::{FetchError, RemoteCache, SchemeFetcher, SchemeRegistry, StaticFetcher};
pub use inputs::{InputMaterializer, StagingCounter};
pub use orchestrator::{Orchestrator, StagedRun, WorkflowSource};
pub use repo::RepoCache;
pub use trs::{ResolvedWorkflow, TrsResolver};
pub use workspace::{CacheLayout, Workspace, WorkspaceLayout};
