use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

use crate::{
    docstore::CompactorPolicy,
    notify::NotificationSettings,
    sensing::{default_entries, AggregatePolicy, ReadPolicy, SensorEntry},
    supervisor::SupervisorPolicy,
};

pub const DEFAULT_SETTINGS_PATH: &str = "solar-logger.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoragePaths {
    pub local_db: PathBuf,
    /// Lives on removable media; writes fail quietly while it is unmounted.
    pub removable_db: PathBuf,
    pub text_log: PathBuf,
    pub document_db: PathBuf,
    pub recovery_file: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self {
            local_db: "/home/pi/solar/db/solar.db".into(),
            removable_db: "/media/usb/shared_data.db".into(),
            text_log: "/home/pi/solar/logs/readings.txt".into(),
            document_db: "/home/pi/solar/db/documents.db".into(),
            recovery_file: "/home/pi/solar/logs/recovery.txt".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSettings {
    pub devices_dir: PathBuf,
    pub load_kernel_modules: bool,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            devices_dir: "/sys/bus/w1/devices".into(),
            load_kernel_modules: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Seconds between the end of one cycle and the start of the next.
    pub interval_secs: f64,
    pub sensor_count: usize,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub paths: StoragePaths,
    pub bus: BusSettings,
    pub reader: ReadPolicy,
    pub aggregator: AggregatePolicy,
    pub supervisor: SupervisorPolicy,
    pub compactor: CompactorPolicy,
    pub notifications: NotificationSettings,
    pub sensors: Vec<SensorEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_secs: 18.9,
            sensor_count: 9,
            log_level: "info".into(),
            log_file: None,
            paths: StoragePaths::default(),
            bus: BusSettings::default(),
            reader: ReadPolicy::default(),
            aggregator: AggregatePolicy::default(),
            supervisor: SupervisorPolicy::default(),
            compactor: CompactorPolicy::default(),
            notifications: NotificationSettings::default(),
            sensors: default_entries(),
        }
    }
}

impl Settings {
    /// Reads settings from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings in {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if !self.interval_secs.is_finite() || self.interval_secs < 0.0 {
            anyhow::bail!("interval_secs must be a non-negative number, got {}", self.interval_secs);
        }
        if self.reader.min_plausible_c >= self.reader.max_plausible_c {
            anyhow::bail!(
                "plausible range {}..{} is empty",
                self.reader.min_plausible_c,
                self.reader.max_plausible_c
            );
        }
        if self.supervisor.max_errors == 0 {
            anyhow::bail!("supervisor.max_errors must be at least 1");
        }
        Ok(())
    }
}
