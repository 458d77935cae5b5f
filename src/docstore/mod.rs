//! Document store holding raw hour documents and compacted week documents.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{HourDocument, WeekKey};

pub mod compactor;
pub mod sqlite;

pub use compactor::{compress_lines, CompactorPolicy, HourOpening, HourlyCompactor, Recorded};
pub use sqlite::SqliteDocumentStore;

pub type DocId = i64;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The read-modify-write could not be committed or rolled back.
    #[error("document transaction failed: {0}")]
    Transaction(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Outcome of inserting an hour document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourInsert {
    Created(DocId),
    /// Another writer created the hour first; nothing was inserted.
    AlreadyExists(DocId),
}

/// Collaborator interface for the document store.
///
/// Hour documents are matched by their `hour` field within one second.
#[allow(async_fn_in_trait)]
pub trait DocumentStore {
    /// Atomically finds the hour document for `hour` and applies `update` to it.
    /// Returns `None` when no such document exists.
    async fn update_hour<F>(&self, hour: DateTime<Utc>, update: F) -> Result<Option<DocId>, StoreError>
    where
        F: FnOnce(&mut HourDocument) + Send + 'static;

    async fn find_hour(&self, hour: DateTime<Utc>) -> Result<Option<(DocId, HourDocument)>, StoreError>;

    async fn get_hour(&self, id: DocId) -> Result<Option<HourDocument>, StoreError>;

    /// Inserts `doc` unless a document for the same hour already exists.
    async fn insert_hour(&self, doc: HourDocument) -> Result<HourInsert, StoreError>;

    /// Appends `line` to the week document for `key`, creating it if needed.
    async fn append_week_line(
        &self,
        key: WeekKey,
        line: String,
        now: DateTime<Utc>,
    ) -> Result<DocId, StoreError>;

    /// Deletes hour documents whose hour is at or before `cutoff`.
    async fn delete_hours_through(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError>;
}
