use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::models::snapshot::TIMESTAMP_FORMAT;

/// Raw snapshot lines the document store refused, kept for manual replay.
pub struct RecoveryLog {
    path: PathBuf,
}

impl RecoveryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `line`, prefixed with the UTC time of the snapshot it came from.
    pub fn append(&self, taken_at: DateTime<Utc>, line: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open recovery file {}", self.path.display()))?;
        writeln!(file, "{}  {line}", taken_at.format(TIMESTAMP_FORMAT))
            .with_context(|| format!("failed to append to {}", self.path.display()))
    }
}
