use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use crate::error::SecretError;

/// Credentials attached to a named security context, e.g.
/// `{ username = "...", password = "..." }` or `{ token = "..." }`.
///
/// Values are only reachable through [`SecurityContext::get`] and friends;
/// `Debug` prints key names only.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SecurityContext {
    values: BTreeMap<String, String>,
}

impl SecurityContext {
    pub fn new(values: BTreeMap<String, String>) -> Self {
        Self { values }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert("token".into(), token.into());
        Self { values }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        let mut values = BTreeMap::new();
        values.insert("username".into(), username.into());
        values.insert("password".into(), password.into());
        Self { values }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn token(&self) -> Option<&str> {
        self.get("token")
    }

    /// `(username, password)` when both are present.
    pub fn basic_auth(&self) -> Option<(&str, &str)> {
        Some((self.get("username")?, self.get("password")?))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl fmt::Debug for SecurityContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityContext")
            .field("keys", &self.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Backend resolving security-context names to credentials.
///
/// Uses Pin<Box<dyn Future>> for dyn-compatibility.
pub trait CredentialStore: Send + Sync {
    fn lookup<'a>(
        &'a self,
        context: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SecurityContext, SecretError>> + Send + 'a>>;

    /// Names of the contexts this store can resolve (never their values).
    fn list_contexts<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, SecretError>> + Send + 'a>>;

    /// Backend name for logging and configuration.
    fn backend_name(&self) -> &str;
}

/// Environment variable backend. A context resolves to a bearer token read
/// from `<CONTEXT>_TOKEN` (non-alphanumerics mapped to `_`), unless a custom
/// mapping names another variable.
pub struct EnvCredentialStore {
    mappings: HashMap<String, String>,
}

impl EnvCredentialStore {
    pub fn new() -> Self {
        Self {
            mappings: HashMap::new(),
        }
    }

    pub fn with_mappings(mappings: HashMap<String, String>) -> Self {
        Self { mappings }
    }

    fn resolve_env_var(&self, context: &str) -> String {
        if let Some(var) = self.mappings.get(context) {
            return var.clone();
        }
        let upper: String = context
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{upper}_TOKEN")
    }
}

impl Default for EnvCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for EnvCredentialStore {
    fn lookup<'a>(
        &'a self,
        context: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SecurityContext, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            let env_var = self.resolve_env_var(context);
            match std::env::var(&env_var) {
                Ok(value) if !value.is_empty() => {
                    tracing::info!(context = %context, env_var = %env_var, "Security context resolved");
                    Ok(SecurityContext::bearer(value))
                }
                _ => {
                    tracing::warn!(context = %context, env_var = %env_var, "Security context not set");
                    Err(SecretError::NotFound {
                        context: context.into(),
                    })
                }
            }
        })
    }

    fn list_contexts<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            let mut available: Vec<String> = self
                .mappings
                .iter()
                .filter(|(_, var)| std::env::var(var).is_ok())
                .map(|(context, _)| context.clone())
                .collect();
            available.sort();
            Ok(available)
        })
    }

    fn backend_name(&self) -> &str {
        "env"
    }
}

/// Credentials file backend. The file is TOML with one table per context:
///
/// ```toml
/// [ega]
/// username = "alice"
/// password = "s3cret"
///
/// [zenodo]
/// token = "abc"
/// ```
pub struct FileCredentialStore {
    path: PathBuf,
    contexts: HashMap<String, SecurityContext>,
}

impl FileCredentialStore {
    /// Default location: ~/.wfstage/credentials.toml
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".wfstage")
            .join("credentials.toml")
    }

    pub async fn load(path: &Path) -> Result<Self, SecretError> {
        let content = tokio::fs::read_to_string(path).await?;
        let contexts = parse_contexts(&content).map_err(|reason| SecretError::Malformed {
            path: path.display().to_string(),
            reason,
        })?;
        tracing::info!(path = %path.display(), contexts = contexts.len(), "Credentials loaded");
        Ok(Self {
            path: path.to_path_buf(),
            contexts,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_contexts(content: &str) -> Result<HashMap<String, SecurityContext>, String> {
    let raw: HashMap<String, BTreeMap<String, String>> =
        toml::from_str(content).map_err(|e| e.to_string())?;
    Ok(raw
        .into_iter()
        .map(|(name, values)| (name, SecurityContext::new(values)))
        .collect())
}

impl CredentialStore for FileCredentialStore {
    fn lookup<'a>(
        &'a self,
        context: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SecurityContext, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            self.contexts
                .get(context)
                .cloned()
                .ok_or_else(|| SecretError::NotFound {
                    context: context.into(),
                })
        })
    }

    fn list_contexts<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.contexts.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

/// In-memory store; also the "no credentials configured" default.
#[derive(Default)]
pub struct MemoryCredentialStore {
    contexts: HashMap<String, SecurityContext>,
}

impl MemoryCredentialStore {
    pub fn new(contexts: HashMap<String, SecurityContext>) -> Self {
        Self { contexts }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn lookup<'a>(
        &'a self,
        context: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<SecurityContext, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            self.contexts
                .get(context)
                .cloned()
                .ok_or_else(|| SecretError::NotFound {
                    context: context.into(),
                })
        })
    }

    fn list_contexts<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>, SecretError>> + Send + 'a>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.contexts.keys().cloned().collect();
            names.sort();
            Ok(names)
        })
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}
