//! Hour-document buffering and hourly compaction into week documents.
//!
//! Every snapshot line is appended to the document for its UTC hour. The first
//! line of a new hour creates that document, compacts the hour that just closed
//! into a single `avg,max,min` line on the week document, and prunes detail
//! older than the retention window.

use std::{fs::OpenOptions, io::Write, path::PathBuf};

use chrono::{DateTime, Duration, Local, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{round_to, snapshot::TIMESTAMP_FORMAT, HourDocument, TrackedMaxima, WeekKey};

use super::{DocId, DocumentStore, HourInsert, StoreError};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactorPolicy {
    /// Maxima value used when no earlier hour can be found.
    pub floor_sentinel: f64,
    /// Local hour at which carried maxima restart from the floor.
    pub daily_reset_hour: Option<u32>,
    pub retention_hours: i64,
    /// Optional local CSV receiving a copy of every compacted line.
    pub debug_csv_path: Option<PathBuf>,
}

impl Default for CompactorPolicy {
    fn default() -> Self {
        Self {
            floor_sentinel: 0.01,
            daily_reset_hour: Some(5),
            retention_hours: 24 * 7,
            debug_csv_path: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct FieldStats {
    sum: f64,
    count: u32,
    max: Option<f64>,
    min: Option<f64>,
}

impl FieldStats {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
        self.max = Some(self.max.map_or(value, |max| max.max(value)));
        self.min = Some(self.min.map_or(value, |min| min.min(value)));
    }

    fn render(&self) -> String {
        if self.count == 0 {
            return "0,0,0".to_string();
        }
        let average = round_half_up(self.sum / f64::from(self.count));
        format!(
            "{average},{},{}",
            self.max.unwrap_or_default(),
            self.min.unwrap_or_default()
        )
    }
}

/// Two-decimal rounding that pushes exact halves upward.
fn round_half_up(value: f64) -> f64 {
    round_to(value + 0.001, 2)
}

/// Reduces raw snapshot lines to `label,avg,max,min,avg,max,min,...`, one triple
/// per value field. Entries that do not parse as numbers are left out of the
/// statistics; a field that never parses reports `0,0,0`.
pub fn compress_lines(lines: &[String], label: &str) -> String {
    let mut stats: Vec<FieldStats> = Vec::new();

    for line in lines {
        for (i, field) in line.split(',').skip(1).enumerate() {
            if i >= stats.len() {
                stats.resize(i + 1, FieldStats::default());
            }
            if let Ok(value) = field.trim().parse::<f64>() {
                if value.is_finite() {
                    stats[i].add(value);
                }
            }
        }
    }

    let mut output = label.to_string();
    for field in &stats {
        output.push(',');
        output.push_str(&field.render());
    }
    output
}

/// How [`HourlyCompactor::record`] filed a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HourOpening {
    /// Appended to the already open hour.
    Appended,
    /// Opened a new hour, carrying maxima from the closed one.
    Carried { previous: DocId },
    /// Opened a new hour with no earlier hour to carry from; maxima start at the floor.
    NoPrevious,
    /// Another writer opened the hour first; the line was appended to theirs.
    Concurrent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recorded {
    pub id: DocId,
    pub opening: HourOpening,
}

pub struct HourlyCompactor<'a, S> {
    store: &'a S,
    policy: &'a CompactorPolicy,
}

impl<'a, S: DocumentStore> HourlyCompactor<'a, S> {
    pub fn new(store: &'a S, policy: &'a CompactorPolicy) -> Self {
        Self { store, policy }
    }

    /// Files one snapshot line under `hour` and returns that hour's document id.
    ///
    /// `last_hour` is the document id returned by the previous call, if this
    /// process still remembers it.
    pub async fn record(
        &self,
        hour: DateTime<Utc>,
        line: &str,
        current: TrackedMaxima,
        last_hour: Option<DocId>,
        now: DateTime<Utc>,
    ) -> Result<Recorded, StoreError> {
        let appended = line.to_string();
        if let Some(id) = self
            .store
            .update_hour(hour, move |doc| doc.append(appended, current, now))
            .await?
        {
            return Ok(Recorded {
                id,
                opening: HourOpening::Appended,
            });
        }

        let previous = self.previous_hour(hour, last_hour).await?;
        let mut maxima = match &previous {
            Some((_, doc)) => doc.maxima,
            None => {
                log_warn!(
                    "new hour {hour} started with no previous hour document; maxima reset to {}",
                    self.policy.floor_sentinel
                );
                TrackedMaxima::floor(self.policy.floor_sentinel)
            }
        };
        if self.is_daily_reset(hour) {
            maxima = TrackedMaxima::floor(self.policy.floor_sentinel);
        }

        let doc = HourDocument {
            hour,
            lines: vec![line.to_string()],
            maxima,
            last_reading: now,
        };
        let id = match self.store.insert_hour(doc).await? {
            HourInsert::Created(id) => id,
            HourInsert::AlreadyExists(id) => {
                // Another writer opened the hour and owns its rollover.
                log_warn!("hour {hour} was created concurrently; appending instead");
                let appended = line.to_string();
                self.store
                    .update_hour(hour, move |doc| doc.append(appended, current, now))
                    .await?;
                return Ok(Recorded {
                    id,
                    opening: HourOpening::Concurrent,
                });
            }
        };
        log_info!("opened hour document {id} for {hour}");

        let opening = match previous {
            Some((previous_id, previous_doc)) => {
                if let Err(err) = self.compact(&previous_doc, now).await {
                    log_error!("failed to compact hour document {previous_id}: {err}");
                }
                HourOpening::Carried {
                    previous: previous_id,
                }
            }
            None => HourOpening::NoPrevious,
        };
        self.prune(hour).await;

        Ok(Recorded { id, opening })
    }

    /// The document for the hour before `hour`, by remembered id or by query.
    async fn previous_hour(
        &self,
        hour: DateTime<Utc>,
        last_hour: Option<DocId>,
    ) -> Result<Option<(DocId, HourDocument)>, StoreError> {
        if let Some(id) = last_hour {
            match self.store.get_hour(id).await? {
                Some(doc) if doc.hour < hour => return Ok(Some((id, doc))),
                Some(_) => log_warn!("remembered hour document {id} is not older than {hour}"),
                None => log_warn!("remembered hour document {id} no longer exists"),
            }
        }

        let found = self.store.find_hour(hour - Duration::hours(1)).await?;
        if found.is_none() {
            log_warn!("no hour document found for {}", hour - Duration::hours(1));
        }
        Ok(found)
    }

    fn is_daily_reset(&self, hour: DateTime<Utc>) -> bool {
        self.policy
            .daily_reset_hour
            .is_some_and(|reset| hour.with_timezone(&Local).hour() == reset)
    }

    async fn compact(&self, closed: &HourDocument, now: DateTime<Utc>) -> Result<(), StoreError> {
        let label = closed.hour.format(TIMESTAMP_FORMAT).to_string();
        let line = compress_lines(&closed.lines, &label);
        self.write_debug_csv(&line);

        let key = WeekKey::of(closed.hour);
        let week_id = self.store.append_week_line(key, line, now).await?;
        log_info!(
            "compacted {} lines of {label} into week document {week_id}",
            closed.lines.len()
        );
        Ok(())
    }

    fn write_debug_csv(&self, line: &str) {
        let Some(path) = &self.policy.debug_csv_path else {
            return;
        };
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(err) = result {
            log_warn!("failed to append compaction debug line to {}: {err}", path.display());
        }
    }

    async fn prune(&self, hour: DateTime<Utc>) {
        let cutoff = hour - Duration::hours(self.policy.retention_hours);
        match self.store.delete_hours_through(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => log_info!("pruned {deleted} hour documents up to {cutoff}"),
            Err(err) => log_warn!("pruning hour documents failed: {err}"),
        }
    }
}
