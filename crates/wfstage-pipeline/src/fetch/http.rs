use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use tokio::io::AsyncWriteExt;
use url::Url;
use wfstage_secrets::SecurityContext;

use super::FetchError;
use super::scheme::SchemeFetcher;

/// Plain HTTP(S) GET, streamed to disk.
///
/// A security context with `token` is sent as a bearer token; one with
/// `username`/`password` as basic auth.
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemeFetcher for HttpFetcher {
    fn fetch<'a>(
        &'a self,
        uri: &'a Url,
        dest: &'a Path,
        context: Option<&'a SecurityContext>,
    ) -> Pin<Box<dyn Future<Output = Result<(), FetchError>> + Send + 'a>> {
        Box::pin(async move {
            let mut req = self.http.get(uri.clone());
            if let Some(context) = context {
                if let Some(token) = context.token() {
                    req = req.bearer_auth(token);
                } else if let Some((username, password)) = context.basic_auth() {
                    req = req.basic_auth(username, Some(password));
                }
            }

            let transport = |e: reqwest::Error| FetchError::Transport {
                uri: uri.to_string(),
                reason: e.to_string(),
            };

            let mut resp = req.send().await.map_err(transport)?;
            if !resp.status().is_success() {
                return Err(FetchError::Http {
                    uri: uri.to_string(),
                    status: resp.status().as_u16(),
                });
            }

            let mut file = tokio::fs::File::create(dest).await?;
            let mut written = 0u64;
            while let Some(chunk) = resp.chunk().await.map_err(transport)? {
                file.write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            file.flush().await?;

            tracing::debug!(uri = %uri, bytes = written, "HTTP download complete");
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
