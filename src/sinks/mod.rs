//! Best-effort fan-out of each snapshot to the local store, the removable
//! store and the text log. A failing sink never stops the others.

use std::path::PathBuf;

use anyhow::Result;

use crate::db::{no_init, Database};
use crate::models::Snapshot;

pub mod recovery;
pub mod text_log;

pub use recovery::RecoveryLog;
pub use text_log::TextLogSink;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// SQLite file on media that may come and go; reopened on demand.
pub struct RemovableStore {
    path: PathBuf,
    db: Option<Database>,
}

impl RemovableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            db: None,
        }
    }

    pub async fn write(&mut self, snapshot: &Snapshot) -> Result<()> {
        if self.db.is_none() {
            let db = Database::open_existing_dir(self.path.clone(), no_init)?;
            log_info!("removable store opened at {}", self.path.display());
            self.db = Some(db);
        }

        let Some(db) = &self.db else {
            return Ok(());
        };
        let result = db.insert_snapshot(snapshot).await;
        if result.is_err() {
            // The media may have been pulled; reconnect next cycle.
            self.db = None;
        }
        result
    }
}

#[derive(Debug)]
pub struct SinkOutcome {
    pub sink: &'static str,
    pub result: Result<()>,
}

#[derive(Debug, Default)]
pub struct PublishReport {
    pub outcomes: Vec<SinkOutcome>,
}

impl PublishReport {
    pub fn failures(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|outcome| match &outcome.result {
                Ok(()) => None,
                Err(err) => Some(format!("{}: {err:#}", outcome.sink)),
            })
            .collect()
    }

    pub fn all_ok(&self) -> bool {
        self.outcomes.iter().all(|outcome| outcome.result.is_ok())
    }
}

pub struct Fanout {
    local: Database,
    removable: RemovableStore,
    text: TextLogSink,
}

impl Fanout {
    pub fn new(local: Database, removable: RemovableStore, text: TextLogSink) -> Self {
        Self {
            local,
            removable,
            text,
        }
    }

    pub fn local(&self) -> &Database {
        &self.local
    }

    pub async fn publish(&mut self, snapshot: &Snapshot) -> PublishReport {
        let mut report = PublishReport::default();

        report.outcomes.push(SinkOutcome {
            sink: "local store",
            result: self.local.insert_snapshot(snapshot).await,
        });
        report.outcomes.push(SinkOutcome {
            sink: "text log",
            result: self.text.write(snapshot),
        });
        report.outcomes.push(SinkOutcome {
            sink: "removable store",
            result: self.removable.write(snapshot).await,
        });

        for failure in report.failures() {
            log_warn!("sink write failed: {failure}");
        }
        report
    }
}
