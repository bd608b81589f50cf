use thiserror::Error;
use trellis_di::ContainerError;
use trellis_storage::StorageError;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("no route matches path: {path}")]
    UnmatchedRoute { path: String },

    #[error("template {template} not found for <{tag}>")]
    MissingTemplate { tag: String, template: String },

    #[error("component already registered: {tag}")]
    DuplicateRegistration { tag: String },

    #[error("invalid component tag {tag:?}: {reason}")]
    InvalidTagName { tag: String, reason: String },

    #[error("custom element already defined: {tag}")]
    AlreadyDefined { tag: String },

    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("invalid selector {selector:?}: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("host node #{0} not found")]
    HostNotFound(String),

    #[error("hierarchy error: {0}")]
    Hierarchy(String),

    #[error("cannot inject {token} into <{tag}>: {source}")]
    Injection {
        tag: String,
        token: String,
        #[source]
        source: ContainerError,
    },

    #[error("{hook} hook of <{tag}> failed: {message}")]
    Hook {
        tag: String,
        hook: &'static str,
        message: String,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
