//! The polling loop: read every sensor, publish the snapshot, feed the compactor,
//! and hand every failure to the supervisor.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::sleep;

use crate::{
    docstore::{CompactorPolicy, DocId, DocumentStore, HourlyCompactor, StoreError},
    models::{truncate_to_hour, Channel, SensorIdentity, Snapshot, TrackedMaxima},
    notify::Notifier,
    sensing::{AssembleError, CalibrationTable, ReadingAggregator, SensorBus, SensorReader},
    settings::Settings,
    sinks::{Fanout, RecoveryLog},
    supervisor::{Rebooter, Supervisor, Verdict},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Why a cycle produced no stored snapshot.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("failed to list sensors: {0:#}")]
    Bus(anyhow::Error),
    #[error(transparent)]
    Assemble(#[from] AssembleError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// External collaborators the station drives.
pub struct Collaborators<B, S, N, R> {
    pub bus: B,
    pub store: S,
    pub notifier: N,
    pub rebooter: R,
    pub fanout: Fanout,
}

pub struct Station<B, S, N, R> {
    settings: Settings,
    calibration: CalibrationTable,
    bus: B,
    store: S,
    notifier: N,
    rebooter: R,
    fanout: Fanout,
    recovery: RecoveryLog,
    supervisor: Supervisor,
    /// Last assembled snapshot, the first fallback for a failed sensor.
    previous: Option<Snapshot>,
    /// Hour document written by the previous cycle.
    last_hour: Option<DocId>,
}

impl<B, S, N, R> Station<B, S, N, R>
where
    B: SensorBus,
    S: DocumentStore,
    N: Notifier,
    R: Rebooter,
{
    pub fn new(settings: Settings, parts: Collaborators<B, S, N, R>) -> anyhow::Result<Self> {
        let calibration = CalibrationTable::new(&settings.sensors)?;
        let recovery = RecoveryLog::new(settings.paths.recovery_file.clone());
        let supervisor = Supervisor::new(
            settings.supervisor.clone(),
            settings.notifications.debug_topic.clone(),
        );

        Ok(Self {
            settings,
            calibration,
            bus: parts.bus,
            store: parts.store,
            notifier: parts.notifier,
            rebooter: parts.rebooter,
            fanout: parts.fanout,
            recovery,
            supervisor,
            previous: None,
            last_hour: None,
        })
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn previous(&self) -> Option<&Snapshot> {
        self.previous.as_ref()
    }

    pub fn last_hour(&self) -> Option<DocId> {
        self.last_hour
    }

    /// Polls until the supervisor has rebooted the host.
    pub async fn run(&mut self) {
        log_info!(
            "polling {} sensors every {:.1}s",
            self.settings.sensor_count,
            self.settings.interval_secs
        );
        loop {
            if self.run_cycle(Utc::now()).await == Verdict::Rebooted {
                log_info!("reboot issued, polling stopped");
                return;
            }
            sleep(self.settings.interval()).await;
        }
    }

    /// One poll cycle. Every failure is counted at most once.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Verdict {
        let sensors = match self.bus.list_sensors() {
            Ok(sensors) => sensors,
            Err(err) => return self.fail(CycleError::Bus(err)).await,
        };

        let verdict = self
            .supervisor
            .check_sensor_count(
                sensors.len(),
                self.settings.sensor_count,
                &self.notifier,
                &self.rebooter,
            )
            .await;
        if verdict == Verdict::Rebooted {
            return verdict;
        }

        match self.record(&sensors, now).await {
            Ok(()) => Verdict::Continue,
            Err(err) => self.fail(err).await,
        }
    }

    async fn record(&mut self, sensors: &[SensorIdentity], now: DateTime<Utc>) -> Result<(), CycleError> {
        let snapshot = self.assemble(sensors, now).await?;
        self.previous = Some(snapshot.clone());

        let report = self.fanout.publish(&snapshot).await;
        if !report.all_ok() {
            log_warn!("snapshot {} missed {} sink(s)", snapshot.timestamp_string(), report.failures().len());
        }

        let line = snapshot.to_line();
        let current = tracked_maxima(&snapshot, &self.settings.compactor);
        let compactor = HourlyCompactor::new(&self.store, &self.settings.compactor);
        match compactor
            .record(truncate_to_hour(now), &line, current, self.last_hour, now)
            .await
        {
            Ok(recorded) => {
                self.last_hour = Some(recorded.id);
                Ok(())
            }
            Err(err @ StoreError::Transaction(_)) => {
                if let Err(write_err) = self.recovery.append(snapshot.taken_at, &line) {
                    log_error!("failed to save line to recovery file: {write_err:#}");
                } else {
                    log_warn!("saved line to {}", self.recovery.path().display());
                }
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn assemble(&self, sensors: &[SensorIdentity], now: DateTime<Utc>) -> Result<Snapshot, AssembleError> {
        let reader = SensorReader::new(
            &self.bus,
            &self.notifier,
            &self.calibration,
            &self.settings.reader,
            &self.settings.notifications.alert_topic,
        );
        ReadingAggregator::new(reader, Some(self.fanout.local()), &self.settings.aggregator)
            .assemble(sensors, now, self.previous.as_ref())
            .await
    }

    async fn fail(&mut self, err: CycleError) -> Verdict {
        match err {
            CycleError::Assemble(err @ AssembleError::Ultimate { .. }) => {
                self.supervisor
                    .ultimate_failure(&err.to_string(), &self.notifier, &self.rebooter)
                    .await
            }
            err => {
                self.supervisor
                    .record_error(&err.to_string(), &self.notifier, &self.rebooter)
                    .await
            }
        }
    }
}

fn tracked_maxima(snapshot: &Snapshot, policy: &CompactorPolicy) -> TrackedMaxima {
    let floor = policy.floor_sentinel;
    TrackedMaxima {
        glycol_in: snapshot.value(Channel::GlycolIn).unwrap_or(floor),
        glycol_roof: snapshot.value(Channel::GlycolInRoof).unwrap_or(floor),
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::TimeZone;

    use super::*;
    use crate::db::{no_init, Database};
    use crate::docstore::{HourInsert, SqliteDocumentStore};
    use crate::models::{HourDocument, WeekKey};
    use crate::notify::testing::RecordingNotifier;
    use crate::sensing::default_entries;
    use crate::sensing::testing::{blob, ScriptedBus, INCOMPLETE};
    use crate::sinks::{RemovableStore, TextLogSink};
    use crate::supervisor::testing::CountingRebooter;

    fn temp_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("solar-logger-station-{}-{name}", std::process::id()));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn settings(name: &str) -> Settings {
        let mut settings = Settings::default();
        settings.sensor_count = Channel::COUNT;
        settings.paths.recovery_file = temp_path(&format!("{name}-recovery.txt"));
        settings
    }

    fn all_sensors_bus() -> ScriptedBus {
        default_entries()
            .iter()
            .fold(ScriptedBus::new(), |bus, entry| {
                bus.repeat(entry.id.as_str(), &blob(40_000))
            })
    }

    fn fanout(name: &str) -> Fanout {
        Fanout::new(
            Database::in_memory(no_init).expect("local"),
            RemovableStore::new(temp_path("no-such-media").join("shared_data.db")),
            TextLogSink::new(temp_path(&format!("{name}-readings.txt"))),
        )
    }

    fn station<S: DocumentStore>(
        name: &str,
        bus: ScriptedBus,
        store: S,
    ) -> Station<ScriptedBus, S, RecordingNotifier, CountingRebooter> {
        station_with(settings(name), name, bus, store)
    }

    fn station_with<S: DocumentStore>(
        settings: Settings,
        name: &str,
        bus: ScriptedBus,
        store: S,
    ) -> Station<ScriptedBus, S, RecordingNotifier, CountingRebooter> {
        Station::new(
            settings,
            Collaborators {
                bus,
                store,
                notifier: RecordingNotifier::default(),
                rebooter: CountingRebooter::default(),
                fanout: fanout(name),
            },
        )
        .expect("station")
    }

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 8, 25, hour, minute, second).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_healthy_cycle_stores_everywhere() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let mut station = station("healthy", all_sensors_bus(), store.clone());

        let verdict = station.run_cycle(at(10, 15, 0)).await;
        assert_eq!(verdict, Verdict::Continue);
        assert!(station.previous().expect("previous").is_complete());
        assert!(station.last_hour().is_some());
        assert_eq!(station.fanout.local().count_readings().await.expect("count"), 1);
        assert_eq!(store.hour_count().await.expect("hours"), 1);
        assert_eq!(station.supervisor().other_error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hour_rollover_compacts_into_week() {
        let store = SqliteDocumentStore::in_memory().expect("store");
        let mut station = station("rollover", all_sensors_bus(), store.clone());

        station.run_cycle(at(10, 59, 40)).await;
        let first_hour = station.last_hour();
        station.run_cycle(at(10, 59, 59)).await;
        assert_eq!(station.last_hour(), first_hour);

        station.run_cycle(at(11, 0, 18)).await;
        assert_ne!(station.last_hour(), first_hour);

        let week = store
            .get_week(WeekKey::of(at(10, 0, 0)))
            .await
            .expect("week")
            .expect("week exists");
        assert_eq!(week.lines.len(), 1);
        assert!(week.lines[0].starts_with("2024-08-25 10:00:00,"));
    }

    fn bus_without(missing: &str) -> ScriptedBus {
        default_entries()
            .iter()
            .filter(|entry| entry.id.as_str() != missing)
            .fold(ScriptedBus::new(), |bus, entry| {
                bus.repeat(entry.id.as_str(), &blob(40_000))
            })
    }

    #[tokio::test(start_paused = true)]
    async fn test_unwired_sensor_on_fresh_install_keeps_logging() {
        let mut settings = settings("unwired");
        settings.sensor_count = 9;
        let store = SqliteDocumentStore::in_memory().expect("store");
        let mut station = station_with(settings, "unwired", bus_without("071a"), store.clone());

        for cycle in 0..10 {
            let verdict = station
                .run_cycle(at(10, 0, 0) + chrono::Duration::seconds(cycle * 19))
                .await;
            assert_eq!(verdict, Verdict::Continue);
        }

        assert_eq!(station.rebooter.calls.get(), 0);
        assert_eq!(station.supervisor().other_error_count(), 0);
        assert_eq!(station.supervisor().sensor_mismatch_count(), 0);
        assert_eq!(station.fanout.local().count_readings().await.expect("count"), 10);
        assert_eq!(store.hour_count().await.expect("hours"), 1);

        let previous = station.previous().expect("previous");
        assert!(previous.is_complete());
        assert_eq!(previous.value(Channel::SolarOut), Some(0.01));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_mismatch_is_counted_without_reboot() {
        let mut station = station(
            "mismatch",
            bus_without("071a"),
            SqliteDocumentStore::in_memory().expect("store"),
        );

        for cycle in 0..10 {
            let verdict = station
                .run_cycle(at(10, 0, 0) + chrono::Duration::seconds(cycle * 19))
                .await;
            assert_eq!(verdict, Verdict::Continue);
        }

        // Ten mismatches reach the threshold, which resets the counter.
        assert_eq!(station.supervisor().sensor_mismatch_count(), 0);
        assert_eq!(station.supervisor().other_error_count(), 0);
        assert_eq!(station.rebooter.calls.get(), 0);
        assert_eq!(station.fanout.local().count_readings().await.expect("count"), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_incomplete_sensor_reboots() {
        let bus = default_entries()
            .iter()
            .fold(ScriptedBus::new(), |bus, entry| {
                if entry.id.as_str() == "839e" {
                    bus.repeat("839e", INCOMPLETE)
                } else {
                    bus.repeat(entry.id.as_str(), &blob(40_000))
                }
            });
        let mut station = station("ultimate", bus, SqliteDocumentStore::in_memory().expect("store"));

        let verdict = station.run_cycle(at(10, 0, 0)).await;
        assert_eq!(verdict, Verdict::Rebooted);
        assert_eq!(station.rebooter.calls.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_after_reboot() {
        let bus = all_sensors_bus().repeat("839e", INCOMPLETE);
        let mut station = station("run", bus, SqliteDocumentStore::in_memory().expect("store"));
        station.run().await;
        assert_eq!(station.rebooter.calls.get(), 1);
    }

    /// Refuses every transaction, like a remote store without a transaction id.
    struct BrokenStore;

    impl DocumentStore for BrokenStore {
        async fn update_hour<F>(&self, _hour: DateTime<Utc>, _update: F) -> Result<Option<DocId>, StoreError>
        where
            F: FnOnce(&mut HourDocument) + Send + 'static,
        {
            Err(StoreError::Transaction("no transaction id".into()))
        }

        async fn find_hour(&self, _hour: DateTime<Utc>) -> Result<Option<(DocId, HourDocument)>, StoreError> {
            Ok(None)
        }

        async fn get_hour(&self, _id: DocId) -> Result<Option<HourDocument>, StoreError> {
            Ok(None)
        }

        async fn insert_hour(&self, _doc: HourDocument) -> Result<HourInsert, StoreError> {
            Err(StoreError::Transaction("no transaction id".into()))
        }

        async fn append_week_line(
            &self,
            _key: WeekKey,
            _line: String,
            _now: DateTime<Utc>,
        ) -> Result<DocId, StoreError> {
            Ok(1)
        }

        async fn delete_hours_through(&self, _cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transaction_error_saves_line_to_recovery_file() {
        let mut station = station("broken", all_sensors_bus(), BrokenStore);

        let verdict = station.run_cycle(at(10, 0, 0)).await;
        assert_eq!(verdict, Verdict::Continue);
        assert_eq!(station.supervisor().other_error_count(), 1);
        // Local sinks were still written before the document store failed.
        assert_eq!(station.fanout.local().count_readings().await.expect("count"), 1);

        let line = station.previous().expect("previous").to_line();
        let recovered = std::fs::read_to_string(station.recovery.path()).expect("recovery file");
        assert_eq!(recovered.trim_end(), format!("2024-08-25 10:00:00  {line}"));
        std::fs::remove_file(station.recovery.path()).expect("cleanup");
    }
}
