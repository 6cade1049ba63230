//! Reading the packaging metadata of a workflow RO-Crate.
//!
//! Only the `@graph` of the metadata document is looked at. Entity shapes
//! vary between producers, so every reference may be a plain string or an
//! `{"@id": ...}` object, and `@type` may be a string or a list.

use std::io::Read;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use thiserror::Error;
use url::Url;

use crate::error::StageError;

pub const METADATA_FILE: &str = "ro-crate-metadata.json";
const LEGACY_METADATA_FILE: &str = "ro-crate-metadata.jsonld";

/// Hosts whose web URLs can be turned back into clone URLs.
pub const RECOGNIZED_HOSTS: &[&str] = &["github.com"];

#[derive(Debug, Error)]
pub enum CrateError {
    #[error("unreadable RO-Crate archive {}: {reason}", path.display())]
    Archive { path: PathBuf, reason: String },

    #[error("RO-Crate archive {} has no ro-crate-metadata.json", .0.display())]
    MissingMetadata(PathBuf),

    #[error("RO-Crate metadata is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RO-Crate metadata has no @graph")]
    NoGraph,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct RoCrate {
    graph: Vec<Value>,
}

impl RoCrate {
    pub fn from_metadata(doc: Value) -> Result<Self, CrateError> {
        match doc {
            Value::Object(mut map) => match map.remove("@graph") {
                Some(Value::Array(graph)) => Ok(Self { graph }),
                _ => Err(CrateError::NoGraph),
            },
            _ => Err(CrateError::NoGraph),
        }
    }

    /// Read the metadata document out of a zipped crate.
    pub fn from_zip(path: &Path) -> Result<Self, CrateError> {
        let archive_err = |e: zip::result::ZipError| CrateError::Archive {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };

        let file = std::fs::File::open(path)?;
        let mut archive = zip::ZipArchive::new(file).map_err(archive_err)?;

        let name = metadata_entry(archive.file_names())
            .ok_or_else(|| CrateError::MissingMetadata(path.to_path_buf()))?;
        let mut content = String::new();
        archive
            .by_name(&name)
            .map_err(archive_err)?
            .read_to_string(&mut content)?;

        Self::from_metadata(serde_json::from_str(&content)?)
    }

    /// [`RoCrate::from_zip`] off the async runtime.
    pub async fn open(path: PathBuf) -> Result<Self, StageError> {
        let parsed = tokio::task::spawn_blocking(move || Self::from_zip(&path))
            .await
            .map_err(|e| StageError::Io(std::io::Error::other(e)))?;
        Ok(parsed?)
    }

    pub fn entity(&self, id: &str) -> Option<&Map<String, Value>> {
        self.entities()
            .find(|e| e.get("@id").and_then(Value::as_str) == Some(id))
    }

    fn entities(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.graph.iter().filter_map(Value::as_object)
    }

    /// The dataset the metadata descriptor is `about`, else `./`.
    pub fn root_dataset(&self) -> Option<&Map<String, Value>> {
        [METADATA_FILE, LEGACY_METADATA_FILE]
            .into_iter()
            .filter_map(|id| self.entity(id))
            .filter_map(|descriptor| descriptor.get("about").and_then(reference_id))
            .find_map(|about| self.entity(about))
            .or_else(|| self.entity("./"))
    }

    /// Identifier of the first `ComputerLanguage` entity.
    pub fn programming_language(&self) -> Option<&str> {
        let language = self
            .entities()
            .find(|e| has_type(e, "ComputerLanguage"))?;
        language
            .get("identifier")
            .and_then(reference_id)
            .or_else(|| language.get("url").and_then(reference_id))
    }

    /// `isBasedOn` of the root dataset: the upstream workflow location.
    pub fn based_on(&self) -> Option<&str> {
        match self.root_dataset()?.get("isBasedOn")? {
            Value::Array(items) => items.iter().find_map(reference_id),
            other => reference_id(other),
        }
    }
}

fn metadata_entry<'a>(names: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut best: Option<&str> = None;
    for name in names {
        let candidate = [METADATA_FILE, LEGACY_METADATA_FILE].iter().any(|meta| {
            name == *meta || name.ends_with(&format!("/{meta}"))
        });
        if candidate && best.is_none_or(|b| name.len() < b.len()) {
            best = Some(name);
        }
    }
    best.map(str::to_owned)
}

fn has_type(entity: &Map<String, Value>, wanted: &str) -> bool {
    match entity.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

fn reference_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get("@id").and_then(Value::as_str),
        _ => None,
    }
}

/// Clone coordinates derived from a repository web URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoCoordinates {
    pub url: String,
    pub revision: Option<String>,
    pub relative_path: Option<String>,
}

/// Turn a web URL such as
/// `https://github.com/owner/repo/blob/main/dir/workflow.cwl`
/// into `https://github.com/owner/repo.git`, `main`, `dir/workflow.cwl`.
pub fn guess_repository(web_url: &str) -> Result<RepoCoordinates, StageError> {
    let cannot = |why: &str| StageError::CannotGuessRepository(format!("{web_url}: {why}"));

    let parsed = Url::parse(web_url).map_err(|e| cannot(&e.to_string()))?;
    let host = parsed.host_str().unwrap_or_default();
    if !RECOGNIZED_HOSTS.contains(&host) {
        return Err(cannot("unrecognized repository host"));
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.collect())
        .unwrap_or_default();
    let (owner, repo) = match segments.as_slice() {
        [owner, repo, ..] if !owner.is_empty() && !repo.is_empty() => (*owner, *repo),
        _ => return Err(cannot("expected at least owner and repository in the path")),
    };

    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    let url = format!("{}://{host}/{owner}/{repo}.git", parsed.scheme());

    let (revision, relative_path) = match segments.get(2..) {
        Some(["blob", rev, rest @ ..]) if !rev.is_empty() => {
            let rel = rest.join("/");
            (Some(rev.to_string()), (!rel.is_empty()).then_some(rel))
        }
        _ => (None, None),
    };

    Ok(RepoCoordinates {
        url,
        revision,
        relative_path,
    })
}
