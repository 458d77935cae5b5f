//! One poll cycle's worth of readings.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::channel::{Channel, SensorIdentity, RESERVED_SLOTS};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single sensor measurement. Calibration has already been applied exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub identity: SensorIdentity,
    pub raw_celsius: f64,
    pub calibrated_celsius: f64,
    pub timestamp: DateTime<Utc>,
}

/// Values for every channel at one instant, in the fixed channel order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    values: [Option<f64>; Channel::COUNT],
}

impl Snapshot {
    pub fn new(taken_at: DateTime<Utc>, values: [Option<f64>; Channel::COUNT]) -> Self {
        Self { taken_at, values }
    }

    pub fn value(&self, channel: Channel) -> Option<f64> {
        self.values[channel.index()]
    }

    /// True when every in-use channel carries a value.
    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    pub fn timestamp_string(&self) -> String {
        self.taken_at.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Column values in schema order, reserved slots included as `None`.
    pub fn row_values(&self) -> Vec<Option<f64>> {
        self.values
            .iter()
            .copied()
            .chain(std::iter::repeat(None).take(RESERVED_SLOTS))
            .collect()
    }

    /// Comma-joined line: timestamp followed by every column, empty for absent values.
    pub fn to_line(&self) -> String {
        let mut fields = Vec::with_capacity(1 + Channel::COUNT + RESERVED_SLOTS);
        fields.push(self.timestamp_string());
        for value in self.row_values() {
            fields.push(value.map(|v| v.to_string()).unwrap_or_default());
        }
        fields.join(",")
    }
}

/// Splits a snapshot line back into its timestamp and ordered column values.
pub fn parse_line(line: &str) -> Result<(String, Vec<Option<f64>>)> {
    let mut fields = line.trim_end_matches(['\r', '\n']).split(',');
    let timestamp = fields
        .next()
        .filter(|ts| !ts.is_empty())
        .ok_or_else(|| anyhow!("line has no timestamp field"))?
        .to_string();

    let mut values = Vec::new();
    for field in fields {
        if field.trim().is_empty() {
            values.push(None);
        } else {
            let value = field
                .trim()
                .parse::<f64>()
                .map_err(|err| anyhow!("invalid value '{field}': {err}"))?;
            values.push(Some(value));
        }
    }

    Ok((timestamp, values))
}

/// Rounds to a fixed number of decimal places.
pub fn round_to(value: f64, places: u32) -> f64 {
    let factor = 10f64.powi(places as i32);
    (value * factor).round() / factor
}
