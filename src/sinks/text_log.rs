use std::{
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use crate::models::{value_columns, Snapshot, TIMESTAMP_COLUMN};

/// Append-only comma-separated log, one line per cycle.
pub struct TextLogSink {
    path: PathBuf,
}

pub fn header_line() -> String {
    let mut columns = vec![TIMESTAMP_COLUMN.to_string()];
    columns.extend(value_columns());
    columns.join(",")
}

impl TextLogSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the snapshot line, writing the header first if the file is new.
    pub fn write(&self, snapshot: &Snapshot) -> Result<()> {
        let is_new = !self.path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;

        if is_new {
            writeln!(file, "{}", header_line())
                .with_context(|| format!("failed to write header to {}", self.path.display()))?;
        }
        writeln!(file, "{}", snapshot.to_line())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}
