//! Remote object fetching.
//!
//! [`RemoteCache`] maps each URI to one file named after the SHA-256 of the
//! URI. A present file is a hit and is never re-fetched; a miss is
//! downloaded by the [`SchemeFetcher`] registered for the URI's scheme into
//! a temporary file, then renamed into place so readers never see a
//! partial object.

mod ftp;
mod http;
mod scheme;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use url::Url;
use wfstage_core::digest::url_key;
use wfstage_core::{Deadline, Interrupted, MaterializedContent};
use wfstage_secrets::CredentialStore;

pub use ftp::FtpFetcher;
pub use http::HttpFetcher;
pub use scheme::{SchemeFetcher, SchemeRegistry, StaticFetcher};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid URI {0}: expected scheme, host and path")]
    InvalidUri(String),

    #[error("no handler registered for scheme {scheme} (URI {uri})")]
    UnsupportedScheme { scheme: String, uri: String },

    #[error("security context {context} required by {uri} is not available")]
    MissingSecurityContext { context: String, uri: String },

    #[error("{uri} answered HTTP {status}")]
    Http { uri: String, status: u16 },

    #[error("request to {uri} failed: {reason}")]
    Transport { uri: String, reason: String },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parse `uri` and reject anything without a scheme, a host, or a path.
/// A bare root path is accepted; its display name falls back to the digest.
pub fn validate_uri(uri: &str) -> Result<Url, FetchError> {
    let invalid = || FetchError::InvalidUri(uri.into());
    let parsed = Url::parse(uri).map_err(|_| invalid())?;
    let has_host = parsed.host_str().is_some_and(|host| !host.is_empty());
    let path = parsed.path();
    if !has_host || path.is_empty() {
        return Err(invalid());
    }
    Ok(parsed)
}

/// Last non-empty path segment, used as the human-friendly file name.
fn last_segment(url: &Url) -> Option<String> {
    url.path_segments()?
        .rev()
        .find(|segment| !segment.is_empty())
        .map(str::to_owned)
}

/// Content-addressed download cache for one kind of object.
pub struct RemoteCache {
    dir: PathBuf,
    extension: String,
    schemes: Arc<SchemeRegistry>,
    credentials: Arc<dyn CredentialStore>,
    deadline: Deadline,
}

impl RemoteCache {
    pub fn new(
        dir: PathBuf,
        schemes: Arc<SchemeRegistry>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            dir,
            extension: String::new(),
            schemes,
            credentials,
            deadline: Deadline::unbounded(),
        }
    }

    /// Suffix appended to every cached file name (e.g. `.crate.zip`).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn slot_path(&self, uri: &str) -> PathBuf {
        self.dir.join(format!("{}{}", url_key(uri), self.extension))
    }

    /// Make `uri` available locally.
    ///
    /// `context` names the security context the handler gets credentials
    /// from; it is looked up only on a miss.
    pub async fn fetch(
        &self,
        uri: &str,
        context: Option<&str>,
    ) -> Result<MaterializedContent, FetchError> {
        let parsed = validate_uri(uri)?;
        let slot = self.slot_path(uri);
        let display_name = last_segment(&parsed).unwrap_or_else(|| url_key(uri));

        let content = MaterializedContent {
            local_path: slot.clone(),
            source_uri: uri.to_string(),
            display_name,
        };

        if tokio::fs::try_exists(&slot).await? {
            tracing::debug!(uri = %uri, path = %slot.display(), "Remote cache hit");
            return Ok(content);
        }

        let scheme = parsed.scheme();
        let fetcher = self
            .schemes
            .get(scheme)
            .ok_or_else(|| FetchError::UnsupportedScheme {
                scheme: scheme.into(),
                uri: uri.into(),
            })?;

        let security = match context {
            Some(name) => Some(self.credentials.lookup(name).await.map_err(|e| {
                tracing::warn!(context = %name, error = %e, "Security context lookup failed");
                FetchError::MissingSecurityContext {
                    context: name.into(),
                    uri: uri.into(),
                }
            })?),
            None => None,
        };

        tokio::fs::create_dir_all(&self.dir).await?;
        let staging = tempfile::Builder::new()
            .prefix(".fetch-")
            .tempfile_in(&self.dir)?;

        tracing::info!(uri = %uri, handler = fetcher.name(), "Fetching remote object");
        self.deadline
            .run(
                &format!("fetch {uri}"),
                fetcher.fetch(&parsed, staging.path(), security.as_ref()),
            )
            .await??;

        staging.persist(&slot).map_err(|e| FetchError::Io(e.error))?;
        tracing::info!(uri = %uri, path = %slot.display(), "Remote object cached");
        Ok(content)
    }
}
