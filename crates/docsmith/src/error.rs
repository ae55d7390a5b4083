use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocsmithError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] crate::sandbox::SandboxError),

    #[error("Persistence error: {0}")]
    Persist(#[from] crate::persist::PersistError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] crate::upstream::UpstreamError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] crate::workflow::WorkflowError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read settings file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse settings JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Settings validation failed: {message}")]
    Validation { message: String },

    #[error("Invalid timeout for '{entry_point}': {reason}")]
    InvalidTimeout { entry_point: String, reason: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Worker pool is shut down")]
    ChannelClosed,

    #[error("Failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, DocsmithError>;
