use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Effective engine version a workflow needs (e.g. a cwltool release).
pub type EngineVersion = String;

/// Opaque fingerprint of a materialized engine or container.
pub type Fingerprint = String;

/// An abstract workflow: a registry id plus version, or a repository URL
/// plus branch/tag/commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowReference {
    pub id: String,
    #[serde(default)]
    pub version: Option<String>,
    /// Raw TRS descriptor tag (`CWL`, `NFL`, ...) requested by the caller.
    #[serde(default)]
    pub descriptor_type: Option<String>,
}

impl WorkflowReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: None,
            descriptor_type: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_descriptor_type(mut self, descriptor_type: impl Into<String>) -> Self {
        self.descriptor_type = Some(descriptor_type.into());
        self
    }

    /// The requested version, treating an empty string as "not given".
    pub fn requested_version(&self) -> Option<&str> {
        self.version.as_deref().filter(|v| !v.is_empty())
    }
}

/// Static description of a supported workflow language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineDescriptor {
    pub engine_name: &'static str,
    /// Programming-language identifier used in RO-Crate manifests.
    pub uri: &'static str,
    /// Descriptor tag used by GA4GH TRS registries.
    pub trs_descriptor: &'static str,
}

const NEXTFLOW: EngineDescriptor = EngineDescriptor {
    engine_name: "nextflow",
    uri: "https://www.nextflow.io/",
    trs_descriptor: "NFL",
};

const CWL: EngineDescriptor = EngineDescriptor {
    engine_name: "cwl",
    uri: "https://w3id.org/cwl/v1.0/",
    trs_descriptor: "CWL",
};

/// The closed set of engine kinds. [`EngineKind::ALL`] is the registration
/// order, which doubles as identification priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Nextflow,
    Cwl,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Nextflow, EngineKind::Cwl];

    pub fn descriptor(self) -> &'static EngineDescriptor {
        match self {
            EngineKind::Nextflow => &NEXTFLOW,
            EngineKind::Cwl => &CWL,
        }
    }

    pub fn from_trs_descriptor(tag: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.descriptor().trs_descriptor == tag)
    }

    pub fn from_language_uri(uri: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.descriptor().uri == uri)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor().engine_name)
    }
}

/// A workflow checked out on local storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalWorkflow {
    pub directory: PathBuf,
    /// Directory or file inside `directory`; may be absent.
    pub relative_path: Option<PathBuf>,
    /// Commit hash actually checked out, never a branch or tag name.
    pub effective_checkout: String,
}

impl LocalWorkflow {
    /// The file or directory engines should look at.
    pub fn entry_point(&self) -> PathBuf {
        match &self.relative_path {
            Some(rel) => self.directory.join(rel),
            None => self.directory.clone(),
        }
    }
}

/// One remote object staged for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedContent {
    pub local_path: PathBuf,
    pub source_uri: String,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputValue {
    Content(MaterializedContent),
    Scalar(serde_json::Value),
}

/// One leaf of the flattened parameter tree; `name` is the dotted path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterializedInput {
    pub name: String,
    pub values: Vec<InputValue>,
}

impl MaterializedInput {
    /// The staged files of this input, skipping scalar values.
    pub fn contents(&self) -> impl Iterator<Item = &MaterializedContent> {
        self.values.iter().filter_map(|value| match value {
            InputValue::Content(content) => Some(content),
            InputValue::Scalar(_) => None,
        })
    }
}

/// An engine provisioned at a concrete version for a given workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedEngine {
    pub kind: EngineKind,
    pub version: EngineVersion,
    pub fingerprint: Option<Fingerprint>,
    pub workflow: LocalWorkflow,
}

/// A workflow prepared by its engine, together with the containers it uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializedWorkflow {
    pub engine: MaterializedEngine,
    pub entry_point: PathBuf,
    pub containers: Vec<Container>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    Docker,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    pub orig_tag: String,
    pub resolved_tag: String,
    pub signature: String,
    pub fingerprint: Option<Fingerprint>,
    pub kind: ContainerKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_keyed_both_ways() {
        for kind in EngineKind::ALL {
            let desc = kind.descriptor();
            assert_eq!(EngineKind::from_trs_descriptor(desc.trs_descriptor), Some(kind));
            assert_eq!(EngineKind::from_language_uri(desc.uri), Some(kind));
        }
        assert_eq!(EngineKind::from_trs_descriptor("WDL"), None);
        assert_eq!(EngineKind::from_language_uri("#cwl"), None);
    }

    #[test]
    fn registration_order_puts_nextflow_first() {
        assert_eq!(EngineKind::ALL, [EngineKind::Nextflow, EngineKind::Cwl]);
    }

    #[test]
    fn empty_version_is_not_a_version() {
        let r = WorkflowReference::new("107").with_version("");
        assert_eq!(r.requested_version(), None);
        let r = WorkflowReference::new("107").with_version("3");
        assert_eq!(r.requested_version(), Some("3"));
    }

    #[test]
    fn entry_point_joins_relative_path() {
        let wf = LocalWorkflow {
            directory: PathBuf::from("/cache/wf-cache/a/b"),
            relative_path: Some(PathBuf::from("workflows/main.cwl")),
            effective_checkout: "0123".into(),
        };
        assert_eq!(
            wf.entry_point(),
            PathBuf::from("/cache/wf-cache/a/b/workflows/main.cwl")
        );
    }

    #[test]
    fn input_values_serialize_untagged() {
        let input = MaterializedInput {
            name: "reads".into(),
            values: vec![
                InputValue::Scalar(serde_json::json!(3)),
                InputValue::Content(MaterializedContent {
                    local_path: PathBuf::from("/w/inputs/a.fq"),
                    source_uri: "https://x/a.fq".into(),
                    display_name: "a.fq".into(),
                }),
            ],
        };
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["values"][0], serde_json::json!(3));
        assert_eq!(json["values"][1]["display_name"], "a.fq");
        assert_eq!(input.contents().count(), 1);
    }
}
