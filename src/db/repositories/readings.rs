use anyhow::{Context, Result};
use rusqlite::{params_from_iter, types::Value, Connection, OptionalExtension};

use crate::db::{
    helpers::{quoted, to_usize},
    Database,
};
use crate::models::{value_columns, Channel, Snapshot, TIMESTAMP_COLUMN};

pub const READINGS_TABLE: &str = "temperature";

fn create_table_sql() -> String {
    let mut columns = vec![format!("{} DATETIME NULL", quoted(TIMESTAMP_COLUMN))];
    columns.extend(
        value_columns()
            .iter()
            .map(|column| format!("{} REAL NULL", quoted(column))),
    );
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quoted(READINGS_TABLE),
        columns.join(", ")
    )
}

fn insert_sql() -> String {
    let placeholders = vec!["?"; 1 + value_columns().len()].join(",");
    format!(
        "INSERT INTO {} VALUES({placeholders})",
        quoted(READINGS_TABLE)
    )
}

/// Idempotent schema declaration for the readings table.
pub fn ensure_readings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(&create_table_sql())
        .context("failed to create readings table")
}

impl Database {
    /// Declares the table if needed and appends one row in the fixed column order.
    pub async fn insert_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let mut row = vec![Value::Text(snapshot.timestamp_string())];
        row.extend(
            snapshot
                .row_values()
                .into_iter()
                .map(|value| value.map(Value::Real).unwrap_or(Value::Null)),
        );

        self.execute(move |conn| {
            ensure_readings_table(conn)?;
            conn.execute(&insert_sql(), params_from_iter(row.iter()))
                .context("failed to insert snapshot row")?;
            Ok(())
        })
        .await
    }

    /// Most recent non-null value recorded for `channel`.
    pub async fn latest_channel_value(&self, channel: Channel) -> Result<Option<f64>> {
        self.execute(move |conn| {
            ensure_readings_table(conn)?;
            let column = quoted(channel.as_str());
            let sql = format!(
                "SELECT {column} FROM {} WHERE {column} IS NOT NULL ORDER BY {} DESC LIMIT 1",
                quoted(READINGS_TABLE),
                quoted(TIMESTAMP_COLUMN),
            );
            let value = conn
                .query_row(&sql, [], |row| row.get::<_, f64>(0))
                .optional()
                .with_context(|| format!("failed to query last {channel} value"))?;
            Ok(value)
        })
        .await
    }

    pub async fn count_readings(&self) -> Result<usize> {
        self.execute(|conn| {
            ensure_readings_table(conn)?;
            let count: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", quoted(READINGS_TABLE)),
                [],
                |row| row.get(0),
            )?;
            to_usize(count, "row count")
        })
        .await
    }
}
