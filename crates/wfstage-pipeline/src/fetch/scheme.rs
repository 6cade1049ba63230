use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use url::Url;
use wfstage_secrets::SecurityContext;

use super::FetchError;
use super::ftp::FtpFetcher;
use super::http::HttpFetcher;

/// Downloads one URI into a local file.
///
/// Implementations write the whole object to `dest` (which already exists
/// and may be truncated) and must not rename or remove it; the cache owns
/// placement. Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait SchemeFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        uri: &'a Url,
        dest: &'a Path,
        context: Option<&'a SecurityContext>,
    ) -> Pin<Box<dyn Future<Output = Result<(), FetchError>> + Send + 'a>>;

    /// Handler name for logging.
    fn name(&self) -> &str;
}

/// Scheme name (lowercase) to handler.
#[derive(Clone, Default)]
pub struct SchemeRegistry {
    handlers: HashMap<String, Arc<dyn SchemeFetcher>>,
}

impl SchemeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http` and `https` served by a shared [`HttpFetcher`], `ftp` by an
    /// [`FtpFetcher`].
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let http: Arc<dyn SchemeFetcher> = Arc::new(HttpFetcher::new());
        registry.register("http", Arc::clone(&http));
        registry.register("https", http);
        registry.register("ftp", Arc::new(FtpFetcher::new()));
        registry
    }

    /// Add or replace the handler for `scheme`. Returns the replaced one.
    pub fn register(
        &mut self,
        scheme: &str,
        fetcher: Arc<dyn SchemeFetcher>,
    ) -> Option<Arc<dyn SchemeFetcher>> {
        self.handlers.insert(scheme.to_ascii_lowercase(), fetcher)
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn SchemeFetcher>> {
        self.handlers.get(&scheme.to_ascii_lowercase()).cloned()
    }

    pub fn schemes(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl fmt::Debug for SchemeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemeRegistry")
            .field("schemes", &self.schemes())
            .finish()
    }
}

/// Fetcher serving canned bodies keyed by full URI, for tests and offline
/// use. Unknown URIs fail with a 404-style error.
pub struct StaticFetcher {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self {
            bodies: HashMap::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_body(mut self, uri: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.bodies.insert(uri.into(), body.into());
        self
    }

    /// How many times `fetch` has been called, including failed calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StaticFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemeFetcher for StaticFetcher {
    fn fetch<'a>(
        &'a self,
        uri: &'a Url,
        dest: &'a Path,
        _context: Option<&'a SecurityContext>,
    ) -> Pin<Box<dyn Future<Output = Result<(), FetchError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let body = self.bodies.get(uri.as_str()).ok_or_else(|| FetchError::Http {
                uri: uri.to_string(),
                status: 404,
            })?;
            tokio::fs::write(dest, body).await?;
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_lowercases_scheme() {
        let mut registry = SchemeRegistry::new();
        registry.register("HTTPS", Arc::new(StaticFetcher::new()));
        assert!(registry.get("https").is_some());
        assert!(registry.get("Https").is_some());
        assert!(registry.get("ftp").is_none());
    }

    #[test]
    fn defaults_cover_http_and_ftp() {
        let registry = SchemeRegistry::with_defaults();
        assert_eq!(registry.schemes(), vec!["ftp", "http", "https"]);
        assert_eq!(registry.get("http").unwrap().name(), "http");
        assert_eq!(registry.get("FTP").unwrap().name(), "ftp");
    }

    #[test]
    fn register_returns_replaced_handler() {
        let mut registry = SchemeRegistry::with_defaults();
        let previous = registry.register("https", Arc::new(StaticFetcher::new()));
        assert_eq!(previous.unwrap().name(), "http");
        assert_eq!(registry.get("https").unwrap().name(), "static");
    }

    #[tokio::test]
    async fn static_fetcher_serves_known_uris() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("out");
        let fetcher = StaticFetcher::new().with_body("https://h/a.txt", "hello");

        let uri = Url::parse("https://h/a.txt").unwrap();
        fetcher.fetch(&uri, &dest, None).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "hello");

        let missing = Url::parse("https://h/b.txt").unwrap();
        assert!(matches!(
            fetcher.fetch(&missing, &dest, None).await,
            Err(FetchError::Http { status: 404, .. })
        ));
        assert_eq!(fetcher.calls(), 2);
    }
}
