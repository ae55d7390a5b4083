//! Maps parsed results onto domain records.
//!
//! Each operation runs in a single transaction and replaces the derived
//! records it owns instead of merging, so applying the same result twice
//! leaves the same rows behind.

mod articles;
mod project;
mod recommendations;
mod suggestions;

use thiserror::Error;

use crate::db::{Database, DatabaseError};
use crate::domain::EntityKind;

pub use articles::{article_fallback_text, update_fallback_text};

#[derive(Error, Debug)]
pub enum PersistError {
    /// The owning entity was deleted while the job ran.
    #[error("{kind} '{id}' no longer exists")]
    TargetMissing { kind: EntityKind, id: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl PersistError {
    pub(crate) fn missing(kind: EntityKind, id: &str) -> Self {
        PersistError::TargetMissing {
            kind,
            id: id.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PersistError>;

/// Outcome of persisting one batch of derived records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistStats {
    pub persisted: usize,
    /// Items rejected at the record level (blank, unknown kind, dangling reference).
    pub dropped: usize,
    /// Prior derived records removed by the replacement.
    pub replaced: usize,
}

impl PersistStats {
    fn keep(&mut self) {
        self.persisted += 1;
    }

    fn drop_item(&mut self) {
        self.dropped += 1;
    }
}

/// Writes job results. Cheap to clone.
#[derive(Clone)]
pub struct ResultPersister {
    db: Database,
}

impl ResultPersister {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
