use std::path::PathBuf;

use thiserror::Error;
use wfstage_core::{EngineKind, Interrupted, ParamError};

use crate::command::CommandError;
use crate::container::ContainerError;
use crate::engine::EngineError;
use crate::fetch::FetchError;
use crate::rocrate::CrateError;

#[derive(Debug, Error)]
pub enum StageError {
    // Configuration
    #[error("config error: {0}")]
    Config(String),

    // Resolution
    #[error("tool {id} from {endpoint} is not labelled as a workflow. Raw answer:\n{raw}")]
    NotAWorkflow {
        id: String,
        endpoint: String,
        raw: String,
    },

    #[error("version {version} not found in workflow {id} from {endpoint}")]
    VersionNotFound {
        version: String,
        id: String,
        endpoint: String,
    },

    #[error("no valid version was found in workflow {id} from {endpoint}")]
    NoValidVersion { id: String, endpoint: String },

    #[error("malformed tool descriptor from {url}: {reason}")]
    MalformedToolDescriptor { url: String, reason: String },

    #[error("descriptor type {0} is not among the acknowledged ones")]
    UnknownDescriptorType(String),

    #[error("descriptor type {descriptor} not available for version {version} of workflow {id}")]
    DescriptorTypeUnavailable {
        descriptor: String,
        version: String,
        id: String,
    },

    #[error("version {version} of workflow {id} has no valid descriptor_type (should be a list)")]
    InvalidDescriptorTypes { version: String, id: String },

    #[error("no recognized descriptor type for version {version} of workflow {id}")]
    NoRecognizedDescriptorType { version: String, id: String },

    #[error("programming language {0} found in RO-Crate is not among the acknowledged ones")]
    UnknownProgrammingLanguage(String),

    #[error("expected programming language {expected}, but RO-Crate declares {found}")]
    ProgrammingLanguageMismatch { expected: String, found: String },

    #[error("unable to guess repository from RO-Crate: {0}")]
    CannotGuessRepository(String),

    #[error("no engine recognized a workflow at {0}")]
    NoEngineRecognized(String),

    #[error("engine {engine} did not recognize a workflow at {repo}")]
    EngineDidNotRecognize { engine: EngineKind, repo: String },

    #[error("relative path {relative} not found in {}", directory.display())]
    RelativePathMissing { relative: String, directory: PathBuf },

    #[error("{0} has not been run yet")]
    StepNotReady(&'static str),

    // Materialization
    #[error(
        "git {operation} failed for {url} (revision {revision}): {status}\nstdout: {stdout}\nstderr: {stderr}"
    )]
    Git {
        operation: String,
        url: String,
        revision: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Crate(#[from] CrateError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Params(#[from] ParamError),

    // Interruption
    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    // Filesystem
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
