//! Builds one fully-populated [`Snapshot`] per poll cycle.
//!
//! A failed sensor is resolved, in order, from the previous snapshot, the
//! latest non-null value in the local store, and a bounded number of spaced
//! re-reads. When all of those come up empty the failure is ultimate and the
//! caller is expected to reboot; a snapshot never leaves here with a gap.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::{sleep, Duration};

use crate::db::Database;
use crate::models::{round_to, Channel, SensorIdentity, Snapshot};
use crate::notify::Notifier;

use super::bus::SensorBus;
use super::reader::SensorReader;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatePolicy {
    /// Decimal places kept for every stored value.
    pub rounding: u32,
    pub reread_attempts: u32,
    pub reread_delay_ms: u64,
    /// Stored for a channel whose sensor is not on the bus and that has no history.
    pub placeholder_value: f64,
}

impl Default for AggregatePolicy {
    fn default() -> Self {
        Self {
            rounding: 2,
            reread_attempts: 3,
            reread_delay_ms: 2_000,
            placeholder_value: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("channel {channel} could not be resolved: {cause}")]
    Ultimate { channel: Channel, cause: String },
}

pub struct ReadingAggregator<'a, B, N> {
    reader: SensorReader<'a, B, N>,
    store: Option<&'a Database>,
    policy: &'a AggregatePolicy,
}

impl<'a, B: SensorBus, N: Notifier> ReadingAggregator<'a, B, N> {
    pub fn new(
        reader: SensorReader<'a, B, N>,
        store: Option<&'a Database>,
        policy: &'a AggregatePolicy,
    ) -> Self {
        Self {
            reader,
            store,
            policy,
        }
    }

    pub async fn assemble(
        &self,
        sensors: &[SensorIdentity],
        taken_at: DateTime<Utc>,
        previous: Option<&Snapshot>,
    ) -> Result<Snapshot, AssembleError> {
        let calibration = self.reader.calibration();
        for id in sensors {
            if calibration.channel_for(id).is_none() {
                log_error!("sensor {id} has no calibration entry; ignoring it");
            }
        }

        let mut values = [None; Channel::COUNT];
        for channel in Channel::ALL {
            let detected = calibration
                .identity_for(channel)
                .filter(|id| sensors.contains(id));

            let value = match detected {
                Some(id) => self.resolve_detected(channel, id, previous).await?,
                None => match self.fallback(channel, previous).await {
                    Some(value) => {
                        log_warn!("no sensor detected for {channel}, using last known value");
                        value
                    }
                    None => {
                        log_warn!(
                            "no sensor detected for {channel} and no history, storing {}",
                            self.policy.placeholder_value
                        );
                        self.policy.placeholder_value
                    }
                },
            };
            values[channel.index()] = Some(round_to(value, self.policy.rounding));
        }

        Ok(Snapshot::new(taken_at, values))
    }

    async fn resolve_detected(
        &self,
        channel: Channel,
        id: &SensorIdentity,
        previous: Option<&Snapshot>,
    ) -> Result<f64, AssembleError> {
        let first_error = match self.reader.read(id).await {
            Ok(reading) => return Ok(reading.calibrated_celsius),
            Err(err) if err.is_fatal() => {
                return Err(AssembleError::Ultimate {
                    channel,
                    cause: err.to_string(),
                })
            }
            Err(err) => err,
        };

        log_warn!("{channel} read failed ({first_error}), trying fallbacks");
        if let Some(value) = self.fallback(channel, previous).await {
            return Ok(value);
        }

        let mut cause = first_error.to_string();
        for attempt in 1..=self.policy.reread_attempts {
            sleep(Duration::from_millis(self.policy.reread_delay_ms)).await;
            match self.reader.read(id).await {
                Ok(reading) => return Ok(reading.calibrated_celsius),
                Err(err) if err.is_fatal() => {
                    return Err(AssembleError::Ultimate {
                        channel,
                        cause: err.to_string(),
                    })
                }
                Err(err) => {
                    log_warn!("{channel} re-read {attempt} failed: {err}");
                    cause = err.to_string();
                }
            }
        }

        Err(AssembleError::Ultimate { channel, cause })
    }

    async fn fallback(&self, channel: Channel, previous: Option<&Snapshot>) -> Option<f64> {
        if let Some(value) = previous.and_then(|snapshot| snapshot.value(channel)) {
            return Some(value);
        }

        let store = self.store?;
        match store.latest_channel_value(channel).await {
            Ok(value) => value,
            Err(err) => {
                log_warn!("local store lookup for {channel} failed: {err:#}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::no_init;
    use crate::notify::testing::RecordingNotifier;
    use crate::sensing::calibration::{default_entries, CalibrationTable};
    use crate::sensing::reader::ReadPolicy;
    use crate::sensing::testing::{blob, ScriptedBus, INCOMPLETE, NOT_READY};

    /// A bus where every default sensor reads `20.000 + index`.
    fn healthy_bus() -> ScriptedBus {
        default_entries()
            .iter()
            .enumerate()
            .fold(ScriptedBus::new(), |bus, (i, entry)| {
                bus.repeat(entry.id.as_str(), &blob(20_000 + 1_000 * i as i64))
            })
    }

    fn bus_with(id: &str, failing_blob: &str) -> ScriptedBus {
        default_entries()
            .iter()
            .enumerate()
            .fold(ScriptedBus::new(), |bus, (i, entry)| {
                if entry.id.as_str() == id {
                    bus.repeat(id, failing_blob)
                } else {
                    bus.repeat(entry.id.as_str(), &blob(20_000 + 1_000 * i as i64))
                }
            })
    }

    struct Fixture {
        table: CalibrationTable,
        read_policy: ReadPolicy,
        policy: AggregatePolicy,
        notifier: RecordingNotifier,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                table: CalibrationTable::new(&default_entries()).expect("table"),
                read_policy: ReadPolicy::default(),
                policy: AggregatePolicy::default(),
                notifier: RecordingNotifier::default(),
            }
        }

        fn aggregator<'a>(
            &'a self,
            bus: &'a ScriptedBus,
            store: Option<&'a Database>,
        ) -> ReadingAggregator<'a, ScriptedBus, RecordingNotifier> {
            let reader = SensorReader::new(bus, &self.notifier, &self.table, &self.read_policy, "alerts");
            ReadingAggregator::new(reader, store, &self.policy)
        }
    }

    fn previous_with(channel: Channel, value: f64) -> Snapshot {
        let mut values = [Some(1.0); Channel::COUNT];
        values[channel.index()] = Some(value);
        Snapshot::new(Utc::now(), values)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_channels_populated_and_rounded() {
        let fixture = Fixture::new();
        let bus = healthy_bus();
        let sensors = bus.list_sensors().expect("list");
        let snapshot = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), None)
            .await
            .expect("assemble");

        assert!(snapshot.is_complete());
        // 839e reads 20.000 with a -0.29 offset; 9e0f reads 23.000 with +0.567.
        assert_eq!(snapshot.value(Channel::GlycolIn), Some(19.71));
        assert_eq!(snapshot.value(Channel::SolarHigh), Some(23.57));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sensor_uses_previous_snapshot() {
        let fixture = Fixture::new();
        let bus = bus_with("4ee6", NOT_READY);
        let sensors = bus.list_sensors().expect("list");
        let previous = previous_with(Channel::GlycolOut, 33.3);

        let snapshot = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), Some(&previous))
            .await
            .expect("assemble");
        assert_eq!(snapshot.value(Channel::GlycolOut), Some(33.3));
        assert!(snapshot.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_sensor_uses_local_store() {
        let fixture = Fixture::new();
        let db = Database::in_memory(no_init).expect("db");
        let stored = previous_with(Channel::GlycolOut, 31.25);
        db.insert_snapshot(&stored).await.expect("seed");

        let bus = bus_with("4ee6", NOT_READY);
        let sensors = bus.list_sensors().expect("list");
        let snapshot = fixture
            .aggregator(&bus, Some(&db))
            .assemble(&sensors, Utc::now(), None)
            .await
            .expect("assemble");
        assert_eq!(snapshot.value(Channel::GlycolOut), Some(31.25));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rereads_recover_without_fallback() {
        let fixture = Fixture::new();
        let bus = healthy_bus().script("4ee6", vec![NOT_READY.to_string(); 6]);
        let sensors = bus.list_sensors().expect("list");

        let snapshot = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), None)
            .await
            .expect("assemble");
        // 4ee6 is the second entry: 21.000 + 0.35.
        assert_eq!(snapshot.value(Channel::GlycolOut), Some(21.35));
        assert_eq!(bus.reads("4ee6"), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_rereads_are_ultimate() {
        let fixture = Fixture::new();
        let bus = bus_with("4ee6", NOT_READY);
        let sensors = bus.list_sensors().expect("list");

        let err = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AssembleError::Ultimate {
                channel: Channel::GlycolOut,
                ..
            }
        ));
        // One initial read plus three re-reads, six bus reads each.
        assert_eq!(bus.reads("4ee6"), 24);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_blob_is_ultimate_immediately() {
        let fixture = Fixture::new();
        let bus = bus_with("4ee6", INCOMPLETE);
        let sensors = bus.list_sensors().expect("list");
        let previous = previous_with(Channel::GlycolOut, 33.3);

        let err = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), Some(&previous))
            .await
            .unwrap_err();
        assert!(matches!(err, AssembleError::Ultimate { .. }));
        assert_eq!(bus.reads("4ee6"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_undetected_channel_falls_back_or_uses_placeholder() {
        let fixture = Fixture::new();
        let bus = healthy_bus();
        let sensors: Vec<SensorIdentity> = bus
            .list_sensors()
            .expect("list")
            .into_iter()
            .filter(|id| id.as_str() != "7b72")
            .collect();

        let previous = previous_with(Channel::GlycolInRoof, 64.5);
        let snapshot = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), Some(&previous))
            .await
            .expect("assemble");
        assert_eq!(snapshot.value(Channel::GlycolInRoof), Some(64.5));
        assert_eq!(bus.reads("7b72"), 0);

        let snapshot = fixture
            .aggregator(&bus, None)
            .assemble(&sensors, Utc::now(), None)
            .await
            .expect("missing sensor without history does not fail the cycle");
        assert!(snapshot.is_complete());
        assert_eq!(snapshot.value(Channel::GlycolInRoof), Some(0.01));
        assert_eq!(bus.reads("7b72"), 0);
    }
}
