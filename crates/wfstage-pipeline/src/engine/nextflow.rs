use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use wfstage_core::{
    EngineKind, EngineVersion, Fingerprint, LocalWorkflow, MaterializedEngine, MaterializedInput,
    MaterializedWorkflow,
};

use super::{EngineError, EngineSettings, WorkflowEngine, extension_of};

const CONFIG_FILE: &str = "nextflow.config";
const MAIN_SCRIPT: &str = "main.nf";

/// Nextflow pipelines. The launcher provisions its own runtime, so there is
/// nothing to install; the version is only recorded.
pub struct NextflowEngine {
    default_version: String,
}

impl NextflowEngine {
    pub fn new(settings: &EngineSettings) -> Self {
        Self {
            default_version: settings.nextflow_version.clone(),
        }
    }

    async fn declared_version(&self, dir: &Path) -> Result<EngineVersion, EngineError> {
        let config = dir.join(CONFIG_FILE);
        if !tokio::fs::try_exists(&config).await? {
            return Ok(self.default_version.clone());
        }
        let content = tokio::fs::read_to_string(&config).await?;
        Ok(parse_nextflow_version(&content).unwrap_or_else(|| self.default_version.clone()))
    }
}

/// `manifest.nextflowVersion = '>=20.04.0'` -> `20.04.0`. Also matches the
/// key inside a `manifest { ... }` block.
pub fn parse_nextflow_version(config: &str) -> Option<String> {
    config.lines().find_map(|line| {
        let line = line.trim();
        let (key, value) = line.split_once('=')?;
        if !key.trim().ends_with("nextflowVersion") {
            return None;
        }
        let version = value
            .trim()
            .trim_matches(|c| c == '\'' || c == '"')
            .trim_start_matches(['!', '>', '<', '=', '~', ' ']);
        (!version.is_empty()).then(|| version.to_string())
    })
}

impl WorkflowEngine for NextflowEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Nextflow
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

            let dir = if metadata.is_dir() {
                let has_marker = tokio::fs::try_exists(entry.join(CONFIG_FILE)).await?
                    || tokio::fs::try_exists(entry.join(MAIN_SCRIPT)).await?;
                if !has_marker {
                    return Ok(None);
                }
                entry
            } else if extension_of(&entry).as_deref() == Some("nf") {
                entry
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| workflow.directory.clone())
            } else {
                return Ok(None);
            };

            self.declared_version(&dir).await.map(Some)
        })
    }

    fn materialize_engine_version<'a>(
        &'a self,
        version: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<(EngineVersion, Option<Fingerprint>), EngineError>> + Send + 'a>>
    {
        Box::pin(async move {
            tracing::info!(engine = "nextflow", version = %version, "Engine version recorded");
            Ok((version.to_string(), None))
        })
    }

    fn materialize_workflow<'a>(
        &'a self,
        engine: &'a MaterializedEngine,
    ) -> Pin<Box<dyn Future<Output = Result<(MaterializedWorkflow, Vec<String>), EngineError>> + Send + 'a>>
    {
        Box::pin(async move {
            let entry: PathBuf = engine.workflow.entry_point();
            if !tokio::fs::try_exists(&entry).await? {
                return Err(EngineError::NotMaterialized {
                    engine: EngineKind::Nextflow,
                    path: entry,
                });
            }
            Ok((
                MaterializedWorkflow {
                    engine: engine.clone(),
                    entry_point: entry,
                    containers: Vec::new(),
                },
                Vec::new(),
            ))
        })
    }

    fn launch_workflow<'a>(
        &'a self,
        _workflow: &'a MaterializedWorkflow,
        _inputs: &'a [MaterializedInput],
        _outputs: &'a serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), EngineError>> + Send + 'a>> {
        Box::pin(async move { Err(EngineError::LaunchUnsupported(EngineKind::Nextflow)) })
    }
}

#[cfg(test)]
mod tests {
    use wfstage_core::Deadline;

    use super::*;
    use crate::engine::EngineMode;

    fn engine() -> NextflowEngine {
        NextflowEngine::new(&EngineSettings {
            cache_dir: PathBuf::from("/cache"),
            mode: EngineMode::Local,
            python_command: "python3".into(),
            cwl_version: "3.0.20201026152241".into(),
            nextflow_version: "19.04.1".into(),
            deadline: Deadline::unbounded(),
        })
    }

    fn local(dir: &Path, rel: Option<&str>) -> LocalWorkflow {
        LocalWorkflow {
            directory: dir.to_path_buf(),
            relative_path: rel.map(PathBuf::from),
            effective_checkout: "0".into(),
        }
    }

    #[test]
    fn parses_declared_versions() {
        assert_eq!(
            parse_nextflow_version("manifest.nextflowVersion = '>=20.04.0'").as_deref(),
            Some("20.04.0")
        );
        assert_eq!(
            parse_nextflow_version("manifest {\n  name = 'x'\n  nextflowVersion = \"!>=21.10.3\"\n}")
                .as_deref(),
            Some("21.10.3")
        );
        assert_eq!(parse_nextflow_version("params.reads = 'x'"), None);
    }

    #[tokio::test]
    async fn recognizes_pipeline_directories() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("main.nf"), "workflow {}\n").unwrap();
        let version = engine().identify(&local(tmp.path(), None)).await.unwrap();
        assert_eq!(version.as_deref(), Some("19.04.1"));

        std::fs::write(
            tmp.path().join("nextflow.config"),
            "manifest.nextflowVersion = '>=20.10.0'\n",
        )
        .unwrap();
        let version = engine().identify(&local(tmp.path(), None)).await.unwrap();
        assert_eq!(version.as_deref(), Some("20.10.0"));
    }

    #[tokio::test]
    async fn recognizes_nf_scripts_and_ignores_others() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("flows")).unwrap();
        std::fs::write(tmp.path().join("flows/align.nf"), "").unwrap();
        std::fs::write(tmp.path().join("flows/align.cwl"), "").unwrap();

        let e = engine();
        assert!(e.identify(&local(tmp.path(), Some("flows/align.nf"))).await.unwrap().is_some());
        assert!(e.identify(&local(tmp.path(), Some("flows/align.cwl"))).await.unwrap().is_none());
        assert!(e.identify(&local(tmp.path(), Some("missing.nf"))).await.unwrap().is_none());
        assert!(e.identify(&local(tmp.path(), Some("flows"))).await.unwrap().is_none());
    }
}
