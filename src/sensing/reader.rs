//! Single-sensor reads with bounded retry, sanity filtering and high-temperature alerts.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::models::{Reading, SensorIdentity};
use crate::notify::{notify_best_effort, Notifier};

use super::bus::{parse_blob, RawBlob, SensorBus};
use super::calibration::{CalibrationError, CalibrationTable};

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Retry bounds and thresholds for a single sensor read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadPolicy {
    /// Reads attempted while the blob is structurally incomplete.
    pub incomplete_attempts: u32,
    /// Backoff grows by this step after every incomplete read.
    pub backoff_step_ms: u64,
    /// Immediate re-reads while the driver has not flagged the conversion complete.
    pub not_ready_retries: u32,
    pub min_plausible_c: f64,
    pub max_plausible_c: f64,
    /// Whole-read retries after a value outside the plausible range.
    pub implausible_retries: u32,
    pub high_temp_alert_c: f64,
}

impl Default for ReadPolicy {
    fn default() -> Self {
        Self {
            incomplete_attempts: 5,
            backoff_step_ms: 250,
            not_ready_retries: 5,
            min_plausible_c: -60.0,
            max_plausible_c: 150.0,
            implausible_retries: 1,
            high_temp_alert_c: 110.0,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReadError {
    #[error("sensor {id} returned incomplete data {attempts} times")]
    Incomplete { id: SensorIdentity, attempts: u32 },
    #[error("sensor {id} still not ready after {retries} retries")]
    NotReady { id: SensorIdentity, retries: u32 },
    #[error("sensor {id} payload has no temperature")]
    Unparseable { id: SensorIdentity },
    #[error("sensor {id} reported implausible {value}°C")]
    Implausible { id: SensorIdentity, value: f64 },
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("bus error on sensor {id}: {message}")]
    Bus { id: SensorIdentity, message: String },
}

impl ReadError {
    /// Fatal errors skip every fallback and go straight to the reboot path.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ReadError::Incomplete { .. })
    }
}

pub struct SensorReader<'a, B, N> {
    bus: &'a B,
    notifier: &'a N,
    calibration: &'a CalibrationTable,
    policy: &'a ReadPolicy,
    alert_topic: &'a str,
}

impl<'a, B: SensorBus, N: Notifier> SensorReader<'a, B, N> {
    pub fn new(
        bus: &'a B,
        notifier: &'a N,
        calibration: &'a CalibrationTable,
        policy: &'a ReadPolicy,
        alert_topic: &'a str,
    ) -> Self {
        Self {
            bus,
            notifier,
            calibration,
            policy,
            alert_topic,
        }
    }

    pub fn calibration(&self) -> &CalibrationTable {
        self.calibration
    }

    /// Reads one sensor and returns its calibrated value.
    ///
    /// Values above the alert threshold are confirmed with a second read; when
    /// both exceed it an alert is pushed. A failed confirmation keeps the first value.
    pub async fn read(&self, id: &SensorIdentity) -> Result<Reading, ReadError> {
        let first = self.read_plausible(id).await?;
        let threshold = self.policy.high_temp_alert_c;
        if first.calibrated_celsius <= threshold {
            return Ok(first);
        }

        log_warn!(
            "sensor {id} above {threshold}°C ({}), confirming",
            first.calibrated_celsius
        );
        match self.read_plausible(id).await {
            Ok(confirmed) if confirmed.calibrated_celsius > threshold => {
                let channel = self
                    .calibration
                    .channel_for(id)
                    .map(|channel| channel.to_string())
                    .unwrap_or_else(|| id.to_string());
                notify_best_effort(
                    self.notifier,
                    self.alert_topic,
                    "High temperature",
                    &format!("{channel} reads {:.1}°C", confirmed.calibrated_celsius),
                )
                .await;
                Ok(confirmed)
            }
            Ok(confirmed) => Ok(confirmed),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                log_warn!("confirmation read of sensor {id} failed: {err}");
                Ok(first)
            }
        }
    }

    async fn read_plausible(&self, id: &SensorIdentity) -> Result<Reading, ReadError> {
        let range = self.policy.min_plausible_c..=self.policy.max_plausible_c;
        let mut remaining = self.policy.implausible_retries;

        loop {
            let reading = self.read_once(id).await?;
            if range.contains(&reading.calibrated_celsius) {
                return Ok(reading);
            }
            if remaining == 0 {
                return Err(ReadError::Implausible {
                    id: id.clone(),
                    value: reading.calibrated_celsius,
                });
            }
            remaining -= 1;
            log_info!(
                "discarding implausible {}°C from sensor {id}, re-reading",
                reading.calibrated_celsius
            );
        }
    }

    async fn read_once(&self, id: &SensorIdentity) -> Result<Reading, ReadError> {
        let mut incomplete = 0;
        let mut not_ready = 0;

        loop {
            let blob = self.bus.read_raw(id).map_err(|err| ReadError::Bus {
                id: id.clone(),
                message: format!("{err:#}"),
            })?;

            match parse_blob(&blob) {
                RawBlob::Incomplete => {
                    incomplete += 1;
                    if incomplete >= self.policy.incomplete_attempts {
                        return Err(ReadError::Incomplete {
                            id: id.clone(),
                            attempts: incomplete,
                        });
                    }
                    let delay = self.policy.backoff_step_ms * u64::from(incomplete);
                    sleep(Duration::from_millis(delay)).await;
                }
                RawBlob::NotReady => {
                    if not_ready >= self.policy.not_ready_retries {
                        return Err(ReadError::NotReady {
                            id: id.clone(),
                            retries: not_ready,
                        });
                    }
                    not_ready += 1;
                }
                RawBlob::Ready(None) => return Err(ReadError::Unparseable { id: id.clone() }),
                RawBlob::Ready(Some(raw_celsius)) => {
                    let calibrated_celsius = self.calibration.calibrate(id, raw_celsius)?;
                    return Ok(Reading {
                        identity: id.clone(),
                        raw_celsius,
                        calibrated_celsius,
                        timestamp: Utc::now(),
                    });
                }
            }
        }
    }
}
