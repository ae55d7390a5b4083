//! Errors raised by the store and its repositories.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("store query failed: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the store's parent directory failed.
    #[error("cannot prepare store location '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("schema step {version} could not be applied: {reason}")]
    Migration { version: u32, reason: String },

    /// Metadata, repository lists and other JSON-encoded columns.
    #[error("column '{column}' holds malformed JSON: {source}")]
    Json {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A run or review status column held a value this build does not know.
    #[error("column '{column}' holds unrecognised value '{value}'")]
    InvalidEnum { column: &'static str, value: String },

    /// Another thread panicked while holding the connection.
    #[error("store connection poisoned by a panicked holder")]
    LockPoisoned,
}
