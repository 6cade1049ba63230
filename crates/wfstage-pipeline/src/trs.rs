//! GA4GH TRS lookup: from a registry id to clone coordinates.
//!
//! Resolution runs in two phases. The registry phase asks the TRS endpoint
//! for the tool, picks a version and a descriptor type, and derives the URL
//! of the version's RO-Crate. The packaging phase downloads that crate
//! (cached), checks its declared programming language and turns the root
//! dataset's `isBasedOn` into a repository URL, revision and path.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use url::Url;
use wfstage_core::{Deadline, EngineKind, WorkflowReference};

use crate::config::{deserialize_id, deserialize_opt_id};
use crate::error::StageError;
use crate::fetch::{FetchError, RemoteCache, SchemeRegistry};
use crate::rocrate::{RoCrate, guess_repository};

pub const DEFAULT_TRS_ENDPOINT: &str = "https://dev.workflowhub.eu/ga4gh/trs/v2/tools/";

/// File suffix of cached RO-Crate archives.
pub const CRATE_EXTENSION: &str = ".crate.zip";

/// The subset of a TRS `Tool` this crate reads.
///
/// Version entries that are not objects are skipped; a version whose
/// `descriptor_type` is not a list fails only once it is selected.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolDescriptor {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_versions")]
    pub versions: Vec<ToolVersion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolVersion {
    #[serde(default = "String::new", deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub descriptor_type: Value,
}

impl ToolVersion {
    /// Offered descriptor tags. `None` when `descriptor_type` is present
    /// but not a list.
    pub fn descriptor_types(&self) -> Option<Vec<&str>> {
        match &self.descriptor_type {
            Value::Null => Some(Vec::new()),
            Value::Array(tags) => Some(tags.iter().filter_map(Value::as_str).collect()),
            _ => None,
        }
    }
}

fn lenient_versions<'de, D>(deserializer: D) -> Result<Vec<ToolVersion>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|entry| serde_json::from_value(entry).ok())
        .collect())
}

/// `toolclass.name == "Workflow"`, read from the raw answer so that the
/// rest of the document does not have to be well formed.
pub fn labelled_workflow(tool: &Value) -> bool {
    tool.pointer("/toolclass/name").and_then(Value::as_str) == Some("Workflow")
}

/// Exact id match when `requested` is given, else the greatest non-empty
/// id in plain string order.
pub fn select_version<'a>(tool: &'a ToolDescriptor, requested: Option<&str>) -> Option<&'a ToolVersion> {
    match requested {
        Some(wanted) => tool.versions.iter().find(|v| v.id == wanted),
        None => tool
            .versions
            .iter()
            .filter(|v| !v.id.is_empty())
            .max_by(|a, b| a.id.cmp(&b.id)),
    }
}

/// Pick the engine for `version`: the requested one if the version offers
/// it, else the first known engine (registration order) it offers.
pub fn choose_descriptor(
    tool_id: &str,
    version: &ToolVersion,
    requested: Option<EngineKind>,
) -> Result<EngineKind, StageError> {
    let tags = version
        .descriptor_types()
        .ok_or_else(|| StageError::InvalidDescriptorTypes {
            version: version.id.clone(),
            id: tool_id.into(),
        })?;
    let offers = |kind: EngineKind| tags.contains(&kind.descriptor().trs_descriptor);
    match requested {
        Some(kind) if offers(kind) => Ok(kind),
        Some(kind) => Err(StageError::DescriptorTypeUnavailable {
            descriptor: kind.descriptor().trs_descriptor.into(),
            version: version.id.clone(),
            id: tool_id.into(),
        }),
        None => EngineKind::ALL.into_iter().find(|kind| offers(*kind)).ok_or_else(|| {
            StageError::NoRecognizedDescriptorType {
                version: version.id.clone(),
                id: tool_id.into(),
            }
        }),
    }
}

/// Where a workflow lives, as derived from its registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedWorkflow {
    pub engine: EngineKind,
    pub repo_url: String,
    pub repo_revision: Option<String>,
    pub relative_path: Option<String>,
}

pub struct TrsResolver {
    endpoint: Url,
    schemes: Arc<SchemeRegistry>,
    crates: RemoteCache,
    deadline: Deadline,
}

impl TrsResolver {
    /// `crates` should be a [`RemoteCache`] over `ro-crate-cache/` with the
    /// [`CRATE_EXTENSION`] suffix.
    pub fn new(
        endpoint: &str,
        schemes: Arc<SchemeRegistry>,
        crates: RemoteCache,
    ) -> Result<Self, StageError> {
        let normalized = if endpoint.ends_with('/') {
            endpoint.to_string()
        } else {
            format!("{endpoint}/")
        };
        let endpoint = Url::parse(&normalized)
            .map_err(|e| StageError::Config(format!("invalid TRS endpoint {endpoint}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(StageError::Config(format!(
                "TRS endpoint {endpoint} cannot be used as a base URL"
            )));
        }
        Ok(Self {
            endpoint,
            schemes,
            crates,
            deadline: Deadline::unbounded(),
        })
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// `{endpoint}/{id}` with the id percent-encoded as one path segment.
    pub fn tool_url(&self, id: &str) -> Url {
        let mut url = self.endpoint.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(id);
        }
        url
    }

    /// `{tool_url}/versions/{version}/{descriptor}/files?format=zip`
    pub fn crate_url(tool_url: &Url, version_id: &str, descriptor: &str) -> Url {
        let mut url = tool_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.extend(["versions", version_id, descriptor, "files"]);
        }
        url.query_pairs_mut().append_pair("format", "zip");
        url
    }

    pub async fn resolve(&self, reference: &WorkflowReference) -> Result<ResolvedWorkflow, StageError> {
        let requested_kind = match reference.descriptor_type.as_deref().filter(|t| !t.is_empty()) {
            Some(tag) => Some(
                EngineKind::from_trs_descriptor(tag)
                    .ok_or_else(|| StageError::UnknownDescriptorType(tag.into()))?,
            ),
            None => None,
        };

        let tool_url = self.tool_url(&reference.id);
        let (document, raw) = self.fetch_tool(&tool_url).await?;

        if !labelled_workflow(&document) {
            return Err(StageError::NotAWorkflow {
                id: reference.id.clone(),
                endpoint: self.endpoint.to_string(),
                raw,
            });
        }
        let tool: ToolDescriptor =
            serde_json::from_value(document).map_err(|e| StageError::MalformedToolDescriptor {
                url: tool_url.to_string(),
                reason: e.to_string(),
            })?;

        let requested_version = reference.requested_version();
        let version = match select_version(&tool, requested_version) {
            Some(version) => version,
            None if tool.versions.is_empty() || requested_version.is_some() => {
                return Err(StageError::VersionNotFound {
                    version: requested_version.unwrap_or_default().into(),
                    id: reference.id.clone(),
                    endpoint: self.endpoint.to_string(),
                });
            }
            None => {
                return Err(StageError::NoValidVersion {
                    id: reference.id.clone(),
                    endpoint: self.endpoint.to_string(),
                });
            }
        };

        let kind = choose_descriptor(&reference.id, version, requested_kind)?;
        let crate_url = Self::crate_url(&tool_url, &version.id, kind.descriptor().trs_descriptor);
        tracing::info!(
            workflow = %reference.id,
            version = %version.id,
            engine = %kind,
            crate_url = %crate_url,
            "TRS version selected"
        );

        self.resolve_from_crate_url(crate_url.as_str(), Some(kind)).await
    }

    /// Packaging phase on its own: resolve a workflow from the URL of its
    /// RO-Crate archive.
    pub async fn resolve_from_crate_url(
        &self,
        crate_url: &str,
        expected: Option<EngineKind>,
    ) -> Result<ResolvedWorkflow, StageError> {
        let content = self.crates.fetch(crate_url, None).await?;
        let rocrate = RoCrate::open(content.local_path).await?;

        let language = rocrate.programming_language().unwrap_or_default();
        let engine = EngineKind::from_language_uri(language)
            .ok_or_else(|| StageError::UnknownProgrammingLanguage(language.into()))?;
        if let Some(expected) = expected {
            if expected != engine {
                return Err(StageError::ProgrammingLanguageMismatch {
                    expected: expected.descriptor().uri.into(),
                    found: language.into(),
                });
            }
        }

        let based_on = rocrate.based_on().ok_or_else(|| {
            StageError::CannotGuessRepository(format!("{crate_url}: root dataset has no isBasedOn"))
        })?;
        let coords = guess_repository(based_on)?;

        tracing::info!(
            engine = %engine,
            repo = %coords.url,
            revision = ?coords.revision,
            path = ?coords.relative_path,
            "Workflow repository resolved"
        );
        Ok(ResolvedWorkflow {
            engine,
            repo_url: coords.url,
            repo_revision: coords.revision,
            relative_path: coords.relative_path,
        })
    }

    /// Uncached GET of the tool descriptor; returns the parsed document with
    /// the raw body for error reports.
    async fn fetch_tool(&self, tool_url: &Url) -> Result<(Value, String), StageError> {
        let fetcher = self
            .schemes
            .get(tool_url.scheme())
            .ok_or_else(|| FetchError::UnsupportedScheme {
                scheme: tool_url.scheme().into(),
                uri: tool_url.to_string(),
            })?;

        let scratch = tempfile::NamedTempFile::new()?;
        tracing::info!(url = %tool_url, "Querying TRS");
        self.deadline
            .run(
                &format!("TRS lookup {tool_url}"),
                fetcher.fetch(tool_url, scratch.path(), None),
            )
            .await??;

        let raw = tokio::fs::read_to_string(scratch.path()).await?;
        let tool = serde_json::from_str(&raw).map_err(|e| StageError::MalformedToolDescriptor {
            url: tool_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok((tool, raw))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wfstage_secrets::MemoryCredentialStore;

    use super::*;

    fn tool(versions: serde_json::Value) -> ToolDescriptor {
        serde_json::from_value(json!({
            "id": 107,
            "toolclass": {"name": "Workflow"},
            "versions": versions,
        }))
        .unwrap()
    }

    fn resolver(endpoint: &str) -> TrsResolver {
        let schemes = Arc::new(SchemeRegistry::new());
        let crates = RemoteCache::new(
            std::env::temp_dir(),
            Arc::clone(&schemes),
            Arc::new(MemoryCredentialStore::default()),
        );
        TrsResolver::new(endpoint, schemes, crates).unwrap()
    }

    #[test]
    fn numeric_ids_become_strings() {
        let t = tool(json!([{"id": 3, "descriptor_type": ["CWL"]}]));
        assert_eq!(t.id.as_deref(), Some("107"));
        assert_eq!(t.versions[0].id, "3");
    }

    #[test]
    fn workflow_label_is_read_from_the_raw_document() {
        assert!(labelled_workflow(&json!({"toolclass": {"name": "Workflow"}})));
        assert!(!labelled_workflow(&json!({"toolclass": {"name": "CommandLineTool"}})));
        assert!(!labelled_workflow(&json!({"toolclass": "Workflow"})));
        assert!(!labelled_workflow(&json!({})));
    }

    #[test]
    fn odd_version_entries_are_skipped() {
        let t = tool(json!(["1", {"id": "2", "descriptor_type": ["CWL"]}, 7]));
        assert_eq!(t.versions.len(), 1);
        assert_eq!(t.versions[0].id, "2");
    }

    #[test]
    fn descriptor_type_must_be_a_list() {
        let t = tool(json!([
            {"id": "1", "descriptor_type": "CWL"},
            {"id": "2"}
        ]));
        assert!(matches!(
            choose_descriptor("107", &t.versions[0], None),
            Err(StageError::InvalidDescriptorTypes { ref version, .. }) if version == "1"
        ));
        assert_eq!(t.versions[1].descriptor_types(), Some(Vec::new()));
        assert!(matches!(
            choose_descriptor("107", &t.versions[1], None),
            Err(StageError::NoRecognizedDescriptorType { .. })
        ));
    }

    #[test]
    fn latest_version_is_lexicographic_max() {
        let t = tool(json!([
            {"id": "1", "descriptor_type": ["CWL"]},
            {"id": "", "descriptor_type": ["CWL"]},
            {"id": "2", "descriptor_type": ["NFL"]},
            {"id": "10", "descriptor_type": ["CWL"]}
        ]));
        assert_eq!(select_version(&t, None).unwrap().id, "2");
        assert_eq!(select_version(&t, Some("10")).unwrap().id, "10");
        assert!(select_version(&t, Some("4")).is_none());
    }

    #[test]
    fn only_empty_ids_means_no_valid_version() {
        let t = tool(json!([{"descriptor_type": ["CWL"]}]));
        assert!(select_version(&t, None).is_none());
    }

    #[test]
    fn descriptor_choice_follows_registration_order() {
        let t = tool(json!([{"id": "1", "descriptor_type": ["CWL", "NFL"]}]));
        let v = &t.versions[0];
        assert_eq!(choose_descriptor("107", v, None).unwrap(), EngineKind::Nextflow);
        assert_eq!(
            choose_descriptor("107", v, Some(EngineKind::Cwl)).unwrap(),
            EngineKind::Cwl
        );
    }

    #[test]
    fn unavailable_or_unknown_descriptors_fail() {
        let t = tool(json!([{"id": "1", "descriptor_type": ["CWL"]}, {"id": "2", "descriptor_type": ["WDL"]}]));
        assert!(matches!(
            choose_descriptor("107", &t.versions[0], Some(EngineKind::Nextflow)),
            Err(StageError::DescriptorTypeUnavailable { .. })
        ));
        assert!(matches!(
            choose_descriptor("107", &t.versions[1], None),
            Err(StageError::NoRecognizedDescriptorType { .. })
        ));
    }

    #[test]
    fn builds_tool_and_crate_urls() {
        let r = resolver("https://trs.example/ga4gh/trs/v2/tools");
        let tool_url = r.tool_url("#workflow/github.com/a b");
        assert_eq!(
            tool_url.as_str(),
            "https://trs.example/ga4gh/trs/v2/tools/%23workflow%2Fgithub.com%2Fa%20b"
        );

        let tool_url = r.tool_url("107");
        let crate_url = TrsResolver::crate_url(&tool_url, "1", "CWL");
        assert_eq!(
            crate_url.as_str(),
            "https://trs.example/ga4gh/trs/v2/tools/107/versions/1/CWL/files?format=zip"
        );
    }

    #[tokio::test]
    async fn unknown_descriptor_fails_before_any_request() {
        // No scheme handlers at all: any network access would be an
        // UnsupportedScheme error instead.
        let r = resolver(DEFAULT_TRS_ENDPOINT);
        let reference = WorkflowReference::new("107").with_descriptor_type("WDL");
        assert!(matches!(
            r.resolve(&reference).await,
            Err(StageError::UnknownDescriptorType(tag)) if tag == "WDL"
        ));
    }
}
