use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use wfstage_core::digest::digest_hex;
use wfstage_core::{Container, ContainerKind, Deadline};

use crate::command::{CommandError, CommandOutput, run_captured};

const DOCKER_PROTO: &str = "docker://";

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("could not materialize docker image {tag} ({status})\nstdout: {stdout}\nstderr: {stderr}")]
    Materialize {
        tag: String,
        status: String,
        stdout: String,
        stderr: String,
    },

    #[error("docker finished properly but did not describe {tag}: {reason}")]
    BadInspect { tag: String, reason: String },

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// How per-image files are named on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContainerNaming {
    /// SHA-256 of the tag.
    #[default]
    Digest,
    /// The tag itself with path and version separators flattened.
    Tag,
}

impl ContainerNaming {
    pub fn file_name(self, tag: &str) -> String {
        match self {
            ContainerNaming::Digest => digest_hex(tag.as_bytes()),
            ContainerNaming::Tag => tag
                .chars()
                .map(|c| if matches!(c, '/' | ':' | '@') { '_' } else { c })
                .collect(),
        }
    }
}

/// Makes container images available locally.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait ContainerFactory: Send + Sync {
    fn kind(&self) -> ContainerKind;

    fn materialize_containers<'a>(
        &'a self,
        tags: &'a [String],
        naming: ContainerNaming,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Container>, ContainerError>> + Send + 'a>>;
}

pub struct DockerContainerFactory {
    docker_command: String,
    /// Where inspected manifests are recorded, one JSON file per image.
    manifests_dir: Option<PathBuf>,
    offline: bool,
    deadline: Deadline,
}

impl DockerContainerFactory {
    pub fn new(docker_command: impl Into<String>) -> Self {
        Self {
            docker_command: docker_command.into(),
            manifests_dir: None,
            offline: false,
            deadline: Deadline::unbounded(),
        }
    }

    pub fn with_manifests_dir(mut self, dir: PathBuf) -> Self {
        self.manifests_dir = Some(dir);
        self
    }

    /// Never pull; images must already be present locally.
    pub fn offline(mut self, offline: bool) -> Self {
        self.offline = offline;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    async fn docker(&self, verb: &str, tag: &str) -> Result<CommandOutput, ContainerError> {
        let mut cmd = Command::new(&self.docker_command);
        cmd.args([verb, tag]);
        let output = run_captured(cmd, &format!("docker {verb} {tag}"), &self.deadline).await?;
        tracing::debug!(
            tag = %tag,
            verb = verb,
            status = %output.status_line(),
            stderr = %output.stderr,
            "docker finished"
        );
        Ok(output)
    }

    async fn materialize_one(&self, tag: &str, naming: ContainerNaming) -> Result<Container, ContainerError> {
        let docker_tag = tag.strip_prefix(DOCKER_PROTO).unwrap_or(tag);
        tracing::info!(tag = %tag, "Materializing docker image");

        let mut output = self.docker("inspect", docker_tag).await?;
        if !output.success() && !self.offline {
            let pulled = self.docker("pull", docker_tag).await?;
            output = if pulled.success() {
                self.docker("inspect", docker_tag).await?
            } else {
                pulled
            };
        }

        if !output.success() {
            return Err(ContainerError::Materialize {
                tag: docker_tag.into(),
                status: output.status_line(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }

        let container = parse_inspect(tag, docker_tag, &output.stdout)?;
        if let Some(dir) = &self.manifests_dir {
            tokio::fs::create_dir_all(dir).await?;
            let path = dir.join(format!("{}.json", naming.file_name(docker_tag)));
            tokio::fs::write(&path, &output.stdout).await?;
        }
        tracing::info!(tag = %tag, signature = %container.signature, "Docker image ready");
        Ok(container)
    }
}

impl ContainerFactory for DockerContainerFactory {
    fn kind(&self) -> ContainerKind {
        ContainerKind::Docker
    }

    fn materialize_containers<'a>(
        &'a self,
        tags: &'a [String],
        naming: ContainerNaming,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Container>, ContainerError>> + Send + 'a>> {
        Box::pin(async move {
            let mut containers = Vec::with_capacity(tags.len());
            for tag in tags {
                containers.push(self.materialize_one(tag, naming).await?);
            }
            Ok(containers)
        })
    }
}

#[derive(Deserialize)]
struct InspectManifest {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "RepoDigests", default)]
    repo_digests: Vec<String>,
}

/// Build a [`Container`] from `docker inspect` output (a JSON list with
/// one manifest).
pub fn parse_inspect(orig_tag: &str, docker_tag: &str, stdout: &str) -> Result<Container, ContainerError> {
    let bad = |reason: String| ContainerError::BadInspect {
        tag: orig_tag.into(),
        reason,
    };
    let manifests: Vec<InspectManifest> = serde_json::from_str(stdout).map_err(|e| bad(e.to_string()))?;
    let manifest = manifests
        .into_iter()
        .next()
        .ok_or_else(|| bad("empty manifest list".into()))?;

    Ok(Container {
        orig_tag: orig_tag.into(),
        resolved_tag: docker_tag.into(),
        signature: manifest.id,
        fingerprint: manifest.repo_digests.into_iter().next(),
        kind: ContainerKind::Docker,
    })
}
