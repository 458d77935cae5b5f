//! Hour and week documents kept in the document store.

use chrono::{DateTime, Datelike, Duration, DurationRound, Utc};
use serde::{Deserialize, Serialize};

/// Running maxima for the two channels the mobile app summarises.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackedMaxima {
    #[serde(rename = "glycol_in_max")]
    pub glycol_in: f64,
    #[serde(rename = "glycol_roof_max")]
    pub glycol_roof: f64,
}

impl TrackedMaxima {
    pub fn floor(sentinel: f64) -> Self {
        Self {
            glycol_in: sentinel,
            glycol_roof: sentinel,
        }
    }

    /// Field-wise maximum of two sets.
    pub fn merge(self, other: TrackedMaxima) -> Self {
        Self {
            glycol_in: self.glycol_in.max(other.glycol_in),
            glycol_roof: self.glycol_roof.max(other.glycol_roof),
        }
    }
}

/// Raw lines for one UTC hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourDocument {
    pub hour: DateTime<Utc>,
    pub lines: Vec<String>,
    #[serde(flatten)]
    pub maxima: TrackedMaxima,
    pub last_reading: DateTime<Utc>,
}

impl HourDocument {
    pub fn append(&mut self, line: String, current: TrackedMaxima, now: DateTime<Utc>) {
        self.lines.push(line);
        self.maxima = self.maxima.merge(current);
        self.last_reading = now;
    }
}

/// Identifies a week document by ISO week number and ISO year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekKey {
    pub week_number: u32,
    pub year: i32,
}

impl WeekKey {
    pub fn of(moment: DateTime<Utc>) -> Self {
        let iso = moment.iso_week();
        Self {
            week_number: iso.week(),
            year: iso.year(),
        }
    }
}

/// One compacted line per closed hour of an ISO week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeekDocument {
    #[serde(rename = "_week_number")]
    pub week_number: u32,
    #[serde(rename = "_year")]
    pub year: i32,
    pub lines: Vec<String>,
    pub last_reading: DateTime<Utc>,
}

impl WeekDocument {
    pub fn key(&self) -> WeekKey {
        WeekKey {
            week_number: self.week_number,
            year: self.year,
        }
    }
}

/// Zeroes minutes, seconds and sub-second parts.
pub fn truncate_to_hour(moment: DateTime<Utc>) -> DateTime<Utc> {
    moment
        .duration_trunc(Duration::hours(1))
        .unwrap_or(moment)
}
