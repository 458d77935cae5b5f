//! [`DocumentStore`] backed by a SQLite file, documents kept as JSON bodies.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use crate::db::{
    helpers::{to_usize, unix_seconds},
    migrations::run_migrations,
    Database,
};
use crate::models::{HourDocument, WeekDocument, WeekKey};

use super::{DocId, DocumentStore, HourInsert, StoreError};

const FIND_HOUR_SQL: &str = "SELECT id, body FROM hour_documents
     WHERE hour_unix >= ?1 AND hour_unix <= ?2
     ORDER BY hour_unix ASC, id ASC
     LIMIT 1";

#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Database,
}

fn transaction_error(err: rusqlite::Error) -> anyhow::Error {
    anyhow::Error::new(StoreError::Transaction(err.to_string()))
}

fn begin(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(transaction_error)
}

fn commit(tx: Transaction<'_>) -> Result<()> {
    tx.commit().map_err(transaction_error)
}

fn find_hour_row(conn: &Connection, hour_unix: i64) -> Result<Option<(DocId, HourDocument)>> {
    let row = conn
        .query_row(FIND_HOUR_SQL, params![hour_unix, hour_unix + 1], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })
        .optional()
        .context("failed to query hour document")?;

    match row {
        Some((id, body)) => {
            let doc = serde_json::from_str(&body)
                .with_context(|| format!("hour document {id} has an invalid body"))?;
            Ok(Some((id, doc)))
        }
        None => Ok(None),
    }
}

impl SqliteDocumentStore {
    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self {
            db: Database::new(path, run_migrations)?,
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            db: Database::in_memory(run_migrations)?,
        })
    }

    async fn run<F, T>(&self, task: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.db
            .execute(task)
            .await
            .map_err(|err| match err.downcast::<StoreError>() {
                Ok(store_err) => store_err,
                Err(err) => StoreError::Backend(err),
            })
    }

    pub async fn get_week(&self, key: WeekKey) -> Result<Option<WeekDocument>, StoreError> {
        self.run(move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM week_documents WHERE year = ?1 AND week_number = ?2",
                    params![key.year, key.week_number],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            body.map(|body| serde_json::from_str(&body).context("week document has an invalid body"))
                .transpose()
        })
        .await
    }

    pub async fn hour_count(&self) -> Result<usize, StoreError> {
        self.run(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM hour_documents", [], |row| row.get(0))?;
            to_usize(count, "hour document count")
        })
        .await
    }
}

impl DocumentStore for SqliteDocumentStore {
    async fn update_hour<F>(&self, hour: DateTime<Utc>, update: F) -> Result<Option<DocId>, StoreError>
    where
        F: FnOnce(&mut HourDocument) + Send + 'static,
    {
        let hour_unix = unix_seconds(hour);
        self.run(move |conn| {
            let tx = begin(conn)?;
            let Some((id, mut doc)) = find_hour_row(&tx, hour_unix)? else {
                return Ok(None);
            };

            update(&mut doc);
            let body = serde_json::to_string(&doc).context("failed to serialize hour document")?;
            tx.execute(
                "UPDATE hour_documents SET body = ?1 WHERE id = ?2",
                params![body, id],
            )
            .context("failed to update hour document")?;
            commit(tx)?;
            Ok(Some(id))
        })
        .await
    }

    async fn find_hour(&self, hour: DateTime<Utc>) -> Result<Option<(DocId, HourDocument)>, StoreError> {
        let hour_unix = unix_seconds(hour);
        self.run(move |conn| find_hour_row(conn, hour_unix)).await
    }

    async fn get_hour(&self, id: DocId) -> Result<Option<HourDocument>, StoreError> {
        self.run(move |conn| {
            let body = conn
                .query_row(
                    "SELECT body FROM hour_documents WHERE id = ?1",
                    params![id],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            body.map(|body| {
                serde_json::from_str(&body)
                    .with_context(|| format!("hour document {id} has an invalid body"))
            })
            .transpose()
        })
        .await
    }

    async fn insert_hour(&self, doc: HourDocument) -> Result<HourInsert, StoreError> {
        let hour_unix = unix_seconds(doc.hour);
        self.run(move |conn| {
            let tx = begin(conn)?;
            if let Some((id, _)) = find_hour_row(&tx, hour_unix)? {
                return Ok(HourInsert::AlreadyExists(id));
            }

            let body = serde_json::to_string(&doc).context("failed to serialize hour document")?;
            tx.execute(
                "INSERT INTO hour_documents (hour_unix, body) VALUES (?1, ?2)",
                params![hour_unix, body],
            )
            .context("failed to insert hour document")?;
            let id = tx.last_insert_rowid();
            commit(tx)?;
            Ok(HourInsert::Created(id))
        })
        .await
    }

    async fn append_week_line(
        &self,
        key: WeekKey,
        line: String,
        now: DateTime<Utc>,
    ) -> Result<DocId, StoreError> {
        self.run(move |conn| {
            let tx = begin(conn)?;
            let existing = tx
                .query_row(
                    "SELECT id, body FROM week_documents WHERE year = ?1 AND week_number = ?2",
                    params![key.year, key.week_number],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()
                .context("failed to query week document")?;

            let id = match existing {
                Some((id, body)) => {
                    let mut doc: WeekDocument = serde_json::from_str(&body)
                        .with_context(|| format!("week document {id} has an invalid body"))?;
                    doc.lines.push(line);
                    doc.last_reading = now;
                    tx.execute(
                        "UPDATE week_documents SET body = ?1 WHERE id = ?2",
                        params![serde_json::to_string(&doc)?, id],
                    )
                    .context("failed to update week document")?;
                    id
                }
                None => {
                    let doc = WeekDocument {
                        week_number: key.week_number,
                        year: key.year,
                        lines: vec![line],
                        last_reading: now,
                    };
                    tx.execute(
                        "INSERT INTO week_documents (week_number, year, body) VALUES (?1, ?2, ?3)",
                        params![key.week_number, key.year, serde_json::to_string(&doc)?],
                    )
                    .context("failed to insert week document")?;
                    tx.last_insert_rowid()
                }
            };

            commit(tx)?;
            Ok(id)
        })
        .await
    }

    async fn delete_hours_through(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff_unix = unix_seconds(cutoff);
        self.run(move |conn| {
            let deleted = conn
                .execute(
                    "DELETE FROM hour_documents WHERE hour_unix <= ?1",
                    params![cutoff_unix],
                )
                .context("failed to prune hour documents")?;
            Ok(deleted)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::models::TrackedMaxima;

    fn hour_doc(hour: DateTime<Utc>, line: &str) -> HourDocument {
        HourDocument {
            hour,
            lines: vec![line.to_string()],
            maxima: TrackedMaxima::floor(0.01),
            last_reading: hour,
        }
    }

    fn ten_o_clock() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 25, 10, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_update_hour_missing_returns_none() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let result = store
            .update_hour(ten_o_clock(), |doc| doc.lines.push("x".into()))
            .await
            .expect("update");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_insert_then_update_hour() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let hour = ten_o_clock();
        let HourInsert::Created(id) = store.insert_hour(hour_doc(hour, "a")).await.expect("insert")
        else {
            panic!("expected a new document");
        };

        let updated = store
            .update_hour(hour, |doc| doc.lines.push("b".into()))
            .await
            .expect("update");
        assert_eq!(updated, Some(id));

        let doc = store.get_hour(id).await.expect("get").expect("exists");
        assert_eq!(doc.lines, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_insert_hour_detects_existing() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let hour = ten_o_clock();
        let first = store.insert_hour(hour_doc(hour, "a")).await.expect("insert");
        let second = store.insert_hour(hour_doc(hour, "b")).await.expect("insert");
        let HourInsert::Created(id) = first else {
            panic!("expected a new document");
        };
        assert_eq!(second, HourInsert::AlreadyExists(id));
        assert_eq!(store.hour_count().await.expect("count"), 1);
    }

    #[tokio::test]
    async fn test_find_hour_tolerates_one_second() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let hour = ten_o_clock();
        store
            .insert_hour(hour_doc(hour + Duration::seconds(1), "a"))
            .await
            .expect("insert");
        assert!(store.find_hour(hour).await.expect("find").is_some());
        assert!(store
            .find_hour(hour - Duration::seconds(1))
            .await
            .expect("find")
            .is_none());
    }

    #[tokio::test]
    async fn test_week_lines_append() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let key = WeekKey::of(ten_o_clock());
        let first = store
            .append_week_line(key, "l1".into(), ten_o_clock())
            .await
            .expect("append");
        let second = store
            .append_week_line(key, "l2".into(), ten_o_clock())
            .await
            .expect("append");
        assert_eq!(first, second);

        let week = store.get_week(key).await.expect("get").expect("exists");
        assert_eq!(week.lines, vec!["l1".to_string(), "l2".to_string()]);
        assert_eq!(week.key(), key);
    }

    #[tokio::test]
    async fn test_delete_hours_through_cutoff() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let hour = ten_o_clock();
        for offset in 0..3 {
            store
                .insert_hour(hour_doc(hour + Duration::hours(offset), "a"))
                .await
                .expect("insert");
        }
        let deleted = store
            .delete_hours_through(hour + Duration::hours(1))
            .await
            .expect("delete");
        assert_eq!(deleted, 2);
        assert_eq!(store.hour_count().await.expect("count"), 1);
    }
}
