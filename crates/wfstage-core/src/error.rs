use thiserror::Error;

/// Errors raised while parsing a declared-inputs tree.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter tree root must be a mapping, got {0}")]
    RootNotMapping(String),

    #[error("unrecognized input class \"{class}\" at {key}")]
    UnrecognizedInputClass { key: String, class: String },

    #[error("input {key} is a File but has no usable \"url\" (expected a string or a list of strings)")]
    MissingUrl { key: String },

    #[error("input {key} has a non-string \"security-context\"")]
    InvalidSecurityContext { key: String },
}

/// An external call that did not get to finish.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Interrupted {
    #[error("{what} timed out after {secs}s")]
    TimedOut { what: String, secs: u64 },

    #[error("{what} was cancelled")]
    Cancelled { what: String },
}
