//! Access to the kernel one-wire subsystem.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{Context, Result};

use crate::models::SensorIdentity;

const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Device folder prefix of DS18B20 family sensors.
const THERMOMETER_FAMILY_PREFIX: &str = "28";
const SLAVE_FILE: &str = "w1_slave";

/// Lists attached sensors and returns their raw measurement blobs.
pub trait SensorBus {
    fn list_sensors(&self) -> Result<Vec<SensorIdentity>>;
    fn read_raw(&self, id: &SensorIdentity) -> Result<String>;
}

/// Reads sensors through `/sys/bus/w1/devices`.
pub struct SysfsBus {
    devices_dir: PathBuf,
}

impl SysfsBus {
    pub fn new(devices_dir: impl Into<PathBuf>, load_kernel_modules: bool) -> Self {
        if load_kernel_modules {
            for module in ["w1-gpio", "w1-therm"] {
                match Command::new("modprobe").arg(module).status() {
                    Ok(status) if status.success() => {}
                    Ok(status) => log_warn!("modprobe {module} exited with {status}"),
                    Err(err) => log_warn!("failed to run modprobe {module}: {err}"),
                }
            }
        }

        Self {
            devices_dir: devices_dir.into(),
        }
    }

    fn device_folders(&self) -> Result<BTreeMap<SensorIdentity, PathBuf>> {
        let entries = fs::read_dir(&self.devices_dir).with_context(|| {
            format!(
                "failed to list one-wire devices in {}",
                self.devices_dir.display()
            )
        })?;

        let mut folders = BTreeMap::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with(THERMOMETER_FAMILY_PREFIX) {
                folders.insert(SensorIdentity::from_device_name(name), entry.path());
            }
        }
        Ok(folders)
    }

    pub fn devices_dir(&self) -> &Path {
        &self.devices_dir
    }
}

impl SensorBus for SysfsBus {
    fn list_sensors(&self) -> Result<Vec<SensorIdentity>> {
        let sensors: Vec<SensorIdentity> = self.device_folders()?.into_keys().collect();
        log_info!("detected {} one-wire sensors", sensors.len());
        Ok(sensors)
    }

    fn read_raw(&self, id: &SensorIdentity) -> Result<String> {
        let folder = self
            .device_folders()?
            .remove(id)
            .with_context(|| format!("sensor {id} is no longer on the bus"))?;
        let path = folder.join(SLAVE_FILE);
        fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))
    }
}

/// A parsed measurement blob.
#[derive(Debug, Clone, PartialEq)]
pub enum RawBlob {
    /// Fewer than two lines; the driver was still writing the file.
    Incomplete,
    /// The CRC line does not end with `YES`.
    NotReady,
    /// Ready, with the `t=` payload if one was found, in degrees Celsius.
    Ready(Option<f64>),
}

/// Interprets a `w1_slave` blob: ready flag in the last three characters of the
/// first line and a `t=<millidegrees>` payload on the second.
pub fn parse_blob(blob: &str) -> RawBlob {
    let lines: Vec<&str> = blob.lines().collect();
    if lines.len() < 2 {
        return RawBlob::Incomplete;
    }
    if !lines[0].trim().ends_with("YES") {
        return RawBlob::NotReady;
    }

    let payload = lines[1].find("t=").and_then(|pos| {
        lines[1][pos + 2..]
            .trim()
            .parse::<f64>()
            .ok()
            .map(|milli| milli / 1000.0)
    });
    RawBlob::Ready(payload)
}
