//! Logical measurement channels and the fixed column layout shared by every sink.
//!
//! The order of [`Channel::ALL`] followed by the reserved slots is the column
//! order of the `temperature` table, the text log header and every snapshot line.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of reserved, always-empty columns appended after the in-use channels.
pub const RESERVED_SLOTS: usize = 10;

/// Name of the leading timestamp column.
pub const TIMESTAMP_COLUMN: &str = "Date_Time";

/// A named measurement point, independent of which physical sensor services it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    GlycolIn,
    GlycolOut,
    GlycolInRoof,
    SolarHigh,
    SolarMid,
    SolarLow,
    SolarLowest,
    BoilerMid,
    BoilerOut,
    SolarOut,
}

impl Channel {
    pub const COUNT: usize = 10;

    pub const ALL: [Channel; Channel::COUNT] = [
        Channel::GlycolIn,
        Channel::GlycolOut,
        Channel::GlycolInRoof,
        Channel::SolarHigh,
        Channel::SolarMid,
        Channel::SolarLow,
        Channel::SolarLowest,
        Channel::BoilerMid,
        Channel::BoilerOut,
        Channel::SolarOut,
    ];

    /// Column name used by the relational schema and the text header.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::GlycolIn => "glycol_in",
            Channel::GlycolOut => "glycol_out",
            Channel::GlycolInRoof => "glycol_in_roof",
            Channel::SolarHigh => "solar_high",
            Channel::SolarMid => "solar_mid",
            Channel::SolarLow => "solar_low",
            Channel::SolarLowest => "solar_lowest",
            Channel::BoilerMid => "boiler_mid",
            Channel::BoilerOut => "boiler_out",
            Channel::SolarOut => "solar_out",
        }
    }

    /// Position of this channel in the fixed column order.
    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All value columns in order: in-use channels, then reserved slots.
pub fn value_columns() -> Vec<String> {
    Channel::ALL
        .iter()
        .map(|channel| channel.as_str().to_string())
        .chain((1..=RESERVED_SLOTS).map(|slot| format!("reserved_{slot}")))
        .collect()
}

/// A physical sensor's short identity: the last four characters of its bus address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorIdentity(String);

impl SensorIdentity {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives the identity from a bus device folder name such as `28-0316a2799e0f`.
    pub fn from_device_name(name: &str) -> Self {
        let chars: Vec<char> = name.chars().collect();
        let start = chars.len().saturating_sub(4);
        Self(chars[start..].iter().collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SensorIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
