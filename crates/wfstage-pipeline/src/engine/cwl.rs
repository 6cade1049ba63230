//! CWL through cwltool, installed in a private virtual environment per
//! version under `{cache}/engines/cwl/{version}`.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use serde_json::Value;
use tokio::process::Command;
use wfstage_core::{
    EngineKind, EngineVersion, Fingerprint, LocalWorkflow, MaterializedEngine, MaterializedInput,
    MaterializedWorkflow,
};

use super::{EngineError, EngineMode, EngineSettings, WorkflowEngine, extension_of};
use crate::command::{CommandOutput, run_captured};

const CWLTOOL_PACKAGE: &str = "cwltool";
const CWL_UTILS_PACKAGE: &str = "cwl-utils";
const CWL_UTILS_VERSION: &str = "0.4";
const SCHEMA_SALAD_PACKAGE: &str = "schema-salad";
const SCHEMA_SALAD_VERSION: &str = "7.0.20200811075006";

/// Written into the venv once every package installed cleanly.
const INSTALLED_MARKER: &str = ".wfstage-installed";

pub struct CwlEngine {
    settings: EngineSettings,
}

impl CwlEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self { settings }
    }

    fn install_dir(&self, version: &str) -> PathBuf {
        self.settings.engines_dir(EngineKind::Cwl).join(version)
    }

    fn venv_bin(&self, version: &str, program: &str) -> PathBuf {
        let bin = if cfg!(windows) { "Scripts" } else { "bin" };
        self.install_dir(version).join(bin).join(program)
    }

    async fn checked(&self, cmd: Command, what: &str) -> Result<CommandOutput, EngineError> {
        let output = run_captured(cmd, what, &self.settings.deadline).await?;
        if !output.success() {
            return Err(EngineError::CommandFailed {
                engine: EngineKind::Cwl,
                what: what.into(),
                status: output.status_line(),
                stdout: output.stdout,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }

    async fn install(&self, version: &str) -> Result<(), EngineError> {
        let install_dir = self.install_dir(version);
        if !tokio::fs::try_exists(install_dir.join("pyvenv.cfg")).await? {
            tracing::info!(version = %version, path = %install_dir.display(), "Creating cwltool virtual environment");
            let mut venv = Command::new(&self.settings.python_command);
            venv.args(["-m", "venv"]).arg(&install_dir);
            self.checked(venv, "python -m venv").await?;
        }

        let pip = self.venv_bin(version, "pip");
        let mut upgrade = Command::new(&pip);
        upgrade
            .args(["install", "--upgrade", "pip", "wheel"])
            .current_dir(&install_dir);
        self.checked(upgrade, "pip install --upgrade pip wheel").await?;

        let mut packages = Command::new(&pip);
        packages
            .arg("install")
            .arg(format!("{SCHEMA_SALAD_PACKAGE}=={SCHEMA_SALAD_VERSION}"))
            .arg(format!("{CWL_UTILS_PACKAGE}=={CWL_UTILS_VERSION}"))
            .arg(format!("{CWLTOOL_PACKAGE}=={version}"))
            .current_dir(&install_dir);
        self.checked(packages, &format!("pip install cwltool=={version}"))
            .await?;

        tokio::fs::write(install_dir.join(INSTALLED_MARKER), version).await?;
        Ok(())
    }
}

/// Whether a YAML/JSON document declares itself as CWL.
fn declares_cwl(content: &str) -> bool {
    content.contains("cwlVersion")
}

/// `{urlHash}_{revHash}_{path_with_underscores}.cwl`: unique per repository
/// slot and entry file.
fn packed_name(workflow: &LocalWorkflow) -> String {
    let tail: Vec<String> = workflow
        .directory
        .components()
        .rev()
        .take(2)
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    let mut parts: Vec<String> = tail.into_iter().rev().collect();
    if let Some(rel) = &workflow.relative_path {
        parts.push(
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("_"),
        );
    }
    let name = parts.join("_");
    if name.ends_with(".cwl") {
        name
    } else {
        format!("{name}.cwl")
    }
}

/// Every `dockerPull` image named anywhere in a packed CWL document, in
/// document order without duplicates.
pub fn docker_pulls(packed: &Value) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    match child {
                        Value::String(tag) if key == "dockerPull" => {
                            if !out.contains(tag) {
                                out.push(tag.clone());
                            }
                        }
                        _ => walk(child, out),
                    }
                }
            }
            Value::Array(items) => items.iter().for_each(|item| walk(item, out)),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk(packed, &mut out);
    out
}

async fn directory_has_cwl(dir: &Path) -> Result<bool, EngineError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file()
            && extension_of(&entry.path()).as_deref() == Some("cwl")
        {
            return Ok(true);
        }
    }
    Ok(false)
}

impl WorkflowEngine for CwlEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Cwl
    }

    fn identify<'a>(
        &'a self,
        workflow: &'a LocalWorkflow,
    ) -> Pin<Box<dyn Future<Output = Result<Option<EngineVersion>, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            let entry = workflow.entry_point();
            let metadata = match tokio::fs::metadata(&entry).await {
                Ok(metadata) => metadata,
                Err(_) => return Ok(None),
            };

            let recognized = if metadata.is_dir() {
                directory_has_cwl(&entry).await?
            } else {
                match extension_of(&entry).as_deref() {
                    Some("cwl" | "yaml" | "yml") => {
                        let content = tokio::fs::read(&entry).await?;
                        declares_cwl(&String::from_utf8_lossy(&content))
                    }
                    _ => false,
                }
            };

            Ok(recognized.then(|| self.settings.cwl_version.clone()))
        })
    }

    fn materialize_engine_version<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(EngineVersion, Option<Fingerprint>), EngineError>> + Send + 'a>>
    {
        Box::pin(async move {
            if self.settings.mode != EngineMode::Local {
                return Err(EngineError::UnsupportedEngineMode {
                    engine: EngineKind::Cwl,
                    mode: self.settings.mode,
                });
            }

            let install_dir = self.install_dir(version);
            if tokio::fs::try_exists(install_dir.join(INSTALLED_MARKER)).await? {
                tracing::info!(version = %version, "cwltool already installed");
            } else {
                tokio::fs::create_dir_all(self.settings.engines_dir(EngineKind::Cwl)).await?;
                self.install(version).await?;
                tracing::info!(version = %version, path = %install_dir.display(), "cwltool installed");
            }
            Ok((version.to_string(), None))
        })
    }

    fn materialize_workflow<'a>(
        &'a self,
        engine: &'a MaterializedEngine,
    ) -> Pin<Box<dyn Future<Output = Result<(MaterializedWorkflow, Vec<String>), EngineError>> + Send + 'a>>
    {
        Box::pin(async move {
            let entry = engine.workflow.entry_point();
            let is_file = tokio::fs::metadata(&entry)
                .await
                .map(|m| m.is_file())
                .unwrap_or(false);
            if !is_file {
                return Err(EngineError::NotMaterialized {
                    engine: EngineKind::Cwl,
                    path: entry,
                });
            }

            let pack_dir = self.settings.pack_dir();
            tokio::fs::create_dir_all(&pack_dir).await?;
            let packed_path = pack_dir.join(packed_name(&engine.workflow));

            let mut pack = Command::new(self.venv_bin(&engine.version, "cwltool"));
            pack.arg("--pack").arg(&entry).current_dir(self.install_dir(&engine.version));
            let output = self.checked(pack, "cwltool --pack").await?;
            tokio::fs::write(&packed_path, &output.stdout).await?;

            let tags = match serde_json::from_str::<Value>(&output.stdout) {
                Ok(packed) => docker_pulls(&packed),
                Err(e) => {
                    tracing::warn!(error = %e, "Packed workflow is not JSON; no container list");
                    Vec::new()
                }
            };
            tracing::info!(
                packed = %packed_path.display(),
                containers = tags.len(),
                "CWL workflow packed"
            );

            Ok((
                MaterializedWorkflow {
                    engine: engine.clone(),
                    entry_point: packed_path,
                    containers: Vec::new(),
                },
                tags,
            ))
        })
    }

    fn launch_workflow<'a>(
        &'a self,
        _workflow: &'a MaterializedWorkflow,
        _inputs: &'a [MaterializedInput],
        _outputs: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move { Err(EngineError::LaunchUnsupported(EngineKind::Cwl)) })
    }
}
