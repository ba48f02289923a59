use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Poller error: {0}")]
    Poller(String),

    #[error("Buffer error: {0}")]
    Buffer(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Worker pool error: {0}")]
    Pool(String),

    #[error("Credential store error: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to resolve a static resource
#[derive(Error, Debug)]
pub enum ResourceError {
    #[error("resource not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

pub type ServerResult<T> = Result<T, ServerError>;
