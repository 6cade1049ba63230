use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("no security context named {context}")]
    NotFound { context: String },

    #[error("credentials file {path} is malformed: {reason}")]
    Malformed { path: String, reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
