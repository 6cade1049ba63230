use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use wfstage_core::WorkflowReference;

use crate::engine::EngineMode;
use crate::error::StageError;
use crate::trs::DEFAULT_TRS_ENDPOINT;

/// Local configuration, read from `~/.wfstage/config.toml` by default.
///
/// Every section is optional. Missing cache or work directories mean
/// "use a scratch directory that is removed when the run ends".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub work: WorkConfig,
    #[serde(default)]
    pub trs: TrsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkConfig {
    pub dir: Option<PathBuf>,
    /// Keep run workspaces after the run instead of removing them.
    #[serde(default)]
    pub keep: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrsConfig {
    #[serde(default = "default_trs_endpoint")]
    pub endpoint: String,
}

impl Default for TrsConfig {
    fn default() -> Self {
        Self {
            endpoint: default_trs_endpoint(),
        }
    }
}

fn default_trs_endpoint() -> String {
    DEFAULT_TRS_ENDPOINT.into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_git")]
    pub git_command: String,
    #[serde(default = "default_docker")]
    pub docker_command: String,
    #[serde(default = "default_python")]
    pub python_command: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git_command: default_git(),
            docker_command: default_docker(),
            python_command: default_python(),
        }
    }
}

fn default_git() -> String {
    "git".into()
}
fn default_docker() -> String {
    "docker".into()
}
fn default_python() -> String {
    "python3".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnginesConfig {
    #[serde(default)]
    pub mode: EngineMode,
    #[serde(default = "default_cwl_version")]
    pub cwl_version: String,
    #[serde(default = "default_nextflow_version")]
    pub nextflow_version: String,
}

impl Default for EnginesConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::default(),
            cwl_version: default_cwl_version(),
            nextflow_version: default_nextflow_version(),
        }
    }
}

fn default_cwl_version() -> String {
    "3.0.20201026152241".into()
}
fn default_nextflow_version() -> String {
    "19.04.1".into()
}

/// Per-step limits in seconds. `0` disables the limit for that step.
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_git_secs")]
    pub git_secs: u64,
    #[serde(default = "default_fetch_secs")]
    pub fetch_secs: u64,
    #[serde(default = "default_engine_secs")]
    pub engine_secs: u64,
    #[serde(default = "default_container_secs")]
    pub container_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            git_secs: default_git_secs(),
            fetch_secs: default_fetch_secs(),
            engine_secs: default_engine_secs(),
            container_secs: default_container_secs(),
        }
    }
}

fn default_git_secs() -> u64 {
    900
}
fn default_fetch_secs() -> u64 {
    600
}
fn default_engine_secs() -> u64 {
    1800
}
fn default_container_secs() -> u64 {
    1800
}

fn limit(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

impl TimeoutsConfig {
    pub fn git(&self) -> Option<Duration> {
        limit(self.git_secs)
    }
    pub fn fetch(&self) -> Option<Duration> {
        limit(self.fetch_secs)
    }
    pub fn engine(&self) -> Option<Duration> {
        limit(self.engine_secs)
    }
    pub fn container(&self) -> Option<Duration> {
        limit(self.container_secs)
    }
}

impl StageConfig {
    /// Default location: ~/.wfstage/config.toml
    pub fn default_path() -> PathBuf {
        wfstage_home().join("config.toml")
    }

    pub fn from_file(path: &Path) -> Result<Self, StageError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| StageError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load `path` when given, else the default file when it exists, else
    /// built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, StageError> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let default = Self::default_path();
                if default.is_file() {
                    Self::from_file(&default)
                } else {
                    tracing::debug!(path = %default.display(), "No config file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }
}

fn wfstage_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".wfstage")
}

/// What to stage: the workflow reference plus its declared inputs and
/// outputs. Read from JSON, or TOML when the file ends in `.toml`.
///
/// ```json
/// {
///   "workflow_id": 107,
///   "version": 1,
///   "workflow_type": "CWL",
///   "params": { "reads": { "c-l-a-s-s": "File", "url": "https://..." } }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowDescription {
    #[serde(deserialize_with = "deserialize_id")]
    pub workflow_id: String,
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub version: Option<String>,
    /// TRS descriptor tag (`CWL`, `NFL`) to insist on.
    #[serde(default)]
    pub workflow_type: Option<String>,
    /// Overrides `[trs] endpoint` for this workflow only.
    #[serde(default)]
    pub trs_endpoint: Option<String>,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub outputs: Value,
}

impl WorkflowDescription {
    pub fn from_file(path: &Path) -> Result<Self, StageError> {
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
        let parsed = if is_toml {
            toml::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            StageError::Config(format!(
                "Failed to parse workflow description {}: {e}",
                path.display()
            ))
        })
    }

    pub fn reference(&self) -> WorkflowReference {
        WorkflowReference {
            id: self.workflow_id.clone(),
            version: self.version.clone(),
            descriptor_type: self.workflow_type.clone(),
        }
    }
}

/// Registries hand out ids as strings or as bare numbers; keep them as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum IdRepr {
    Text(String),
    Int(i64),
    Float(f64),
}

impl From<IdRepr> for String {
    fn from(repr: IdRepr) -> Self {
        match repr {
            IdRepr::Text(s) => s,
            IdRepr::Int(i) => i.to_string(),
            IdRepr::Float(f) => f.to_string(),
        }
    }
}

pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    IdRepr::deserialize(deserializer).map(String::from)
}

pub(crate) fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<IdRepr>::deserialize(deserializer).map(|repr| repr.map(String::from))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = StageConfig::from_toml("").unwrap();
        assert!(config.cache.dir.is_none());
        assert!(config.work.dir.is_none());
        assert!(!config.work.keep);
        assert_eq!(config.trs.endpoint, DEFAULT_TRS_ENDPOINT);
        assert_eq!(config.tools.git_command, "git");
        assert_eq!(config.engines.mode, EngineMode::Local);
        assert_eq!(config.engines.cwl_version, "3.0.20201026152241");
        assert_eq!(config.timeouts.git(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn parses_full_config() {
        let toml_str = r#"
[cache]
dir = "/var/cache/wfstage"

[work]
dir = "/scratch/runs"
keep = true

[trs]
endpoint = "https://workflowhub.eu/ga4gh/trs/v2/tools/"

[tools]
git_command = "/usr/bin/git"
docker_command = "podman"

[engines]
mode = "docker"
cwl_version = "3.1.20210628163208"

[timeouts]
git_secs = 0
fetch_secs = 30
"#;
        let config = StageConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.cache.dir, Some(PathBuf::from("/var/cache/wfstage")));
        assert_eq!(config.work.dir, Some(PathBuf::from("/scratch/runs")));
        assert!(config.work.keep);
        assert_eq!(config.tools.docker_command, "podman");
        assert_eq!(config.tools.python_command, "python3");
        assert_eq!(config.engines.mode, EngineMode::Docker);
        assert_eq!(config.engines.nextflow_version, "19.04.1");
        assert_eq!(config.timeouts.git(), None);
        assert_eq!(config.timeouts.fetch(), Some(Duration::from_secs(30)));
        assert_eq!(config.timeouts.engine(), Some(Duration::from_secs(1800)));
    }

    #[test]
    fn description_accepts_numeric_ids() {
        let desc: WorkflowDescription = serde_json::from_str(
            r#"{"workflow_id": 107, "version": 1, "workflow_type": "CWL",
                "params": {"x": {"c-l-a-s-s": "File", "url": "https://a/b"}}}"#,
        )
        .unwrap();
        let reference = desc.reference();
        assert_eq!(reference.id, "107");
        assert_eq!(reference.version.as_deref(), Some("1"));
        assert_eq!(reference.descriptor_type.as_deref(), Some("CWL"));
        assert!(desc.outputs.is_null());
    }

    #[test]
    fn description_from_toml_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wf.toml");
        std::fs::write(
            &path,
            r#"
workflow_id = "https://github.com/inab/ipc_workflows.git"
version = "main"

[params.input]
"c-l-a-s-s" = "File"
url = ["https://a/1.txt", "https://a/2.txt"]
"#,
        )
        .unwrap();
        let desc = WorkflowDescription::from_file(&path).unwrap();
        assert_eq!(desc.version.as_deref(), Some("main"));
        assert_eq!(desc.params["input"]["url"][1], "https://a/2.txt");
    }

    #[test]
    fn unparseable_description_is_a_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("wf.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            WorkflowDescription::from_file(&path),
            Err(StageError::Config(_))
        ));
    }
}
