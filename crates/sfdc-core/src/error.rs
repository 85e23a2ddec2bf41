use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Describe of '{object}' failed: {message}")]
    RemoteDescribe { object: String, message: String },

    #[error("Remote request failed: {0}")]
    RemoteRequest(String),

    #[error("Objects cannot be selected for export: {}", .0.join(", "))]
    UnselectableObject(Vec<String>),

    #[error("Checkpoint store error: {0}")]
    CheckpointStore(String),

    #[error("Plugin resolution error: {0}")]
    PluginResolution(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("{stream} stream failed: {source}")]
    StreamFailed {
        stream: String,
        #[source]
        source: Arc<Error>,
    },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}
