//! Static identity ↔ channel mapping with per-sensor additive offsets.

use std::collections::HashMap;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{Channel, SensorIdentity};

/// One row of the sensor table as it appears in the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorEntry {
    pub id: SensorIdentity,
    pub channel: Channel,
    /// Degrees added to every raw reading of this sensor.
    pub offset: f64,
}

#[derive(Debug, Error, PartialEq)]
pub enum CalibrationError {
    #[error("sensor {0} has no calibration entry")]
    UnknownSensor(SensorIdentity),
}

#[derive(Debug, Clone)]
pub struct CalibrationTable {
    by_identity: HashMap<SensorIdentity, (Channel, f64)>,
    by_channel: HashMap<Channel, SensorIdentity>,
}

impl CalibrationTable {
    /// Builds the table, rejecting duplicate identities or channels.
    pub fn new(entries: &[SensorEntry]) -> Result<Self> {
        let mut by_identity = HashMap::new();
        let mut by_channel = HashMap::new();

        for entry in entries {
            if by_identity
                .insert(entry.id.clone(), (entry.channel, entry.offset))
                .is_some()
            {
                bail!("sensor {} is listed more than once", entry.id);
            }
            if by_channel.insert(entry.channel, entry.id.clone()).is_some() {
                bail!("channel {} is assigned to more than one sensor", entry.channel);
            }
        }

        Ok(Self {
            by_identity,
            by_channel,
        })
    }

    pub fn calibrate(&self, id: &SensorIdentity, raw_celsius: f64) -> Result<f64, CalibrationError> {
        self.by_identity
            .get(id)
            .map(|(_, offset)| raw_celsius + offset)
            .ok_or_else(|| CalibrationError::UnknownSensor(id.clone()))
    }

    pub fn channel_for(&self, id: &SensorIdentity) -> Option<Channel> {
        self.by_identity.get(id).map(|(channel, _)| *channel)
    }

    pub fn identity_for(&self, channel: Channel) -> Option<&SensorIdentity> {
        self.by_channel.get(&channel)
    }
}

/// The sensors wired into the installation, with offsets measured against a reference probe.
pub fn default_entries() -> Vec<SensorEntry> {
    [
        ("839e", Channel::GlycolIn, -0.29),
        ("4ee6", Channel::GlycolOut, 0.35),
        ("7b72", Channel::GlycolInRoof, -0.045),
        ("9e0f", Channel::SolarHigh, 0.567),
        ("d995", Channel::SolarMid, -0.165),
        ("f969", Channel::SolarLow, -0.636),
        ("1e37", Channel::SolarLowest, 0.0),
        ("1a77", Channel::BoilerMid, 0.142),
        ("f5d6", Channel::BoilerOut, 0.045),
        ("071a", Channel::SolarOut, 0.552),
    ]
    .into_iter()
    .map(|(id, channel, offset)| SensorEntry {
        id: SensorIdentity::new(id),
        channel,
        offset,
    })
    .collect()
}
