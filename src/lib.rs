pub mod db;
pub mod docstore;
pub mod models;
pub mod notify;
pub mod sensing;
pub mod settings;
pub mod sinks;
pub mod station;
pub mod supervisor;
pub mod utils;

use std::path::PathBuf;

use anyhow::{Context, Result};
use db::{no_init, Database};
use docstore::SqliteDocumentStore;
use notify::HttpNotifier;
use sensing::SysfsBus;
use settings::{Settings, DEFAULT_SETTINGS_PATH};
use sinks::{Fanout, RemovableStore, TextLogSink};
use station::{Collaborators, Station};
use supervisor::CommandRebooter;

/// Loads settings from the first argument and polls until a reboot is issued.
pub fn run() -> Result<()> {
    let settings_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH));
    let settings = Settings::load(&settings_path)?;

    utils::init_logging(&settings.log_level, settings.log_file.as_deref())?;
    log::info!("solar logger starting with settings from {}", settings_path.display());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(async move {
        let paths = settings.paths.clone();
        let local = Database::new(paths.local_db.clone(), no_init)?;
        let fanout = Fanout::new(
            local,
            RemovableStore::new(paths.removable_db.clone()),
            TextLogSink::new(paths.text_log.clone()),
        );
        let parts = Collaborators {
            bus: SysfsBus::new(settings.bus.devices_dir.clone(), settings.bus.load_kernel_modules),
            store: SqliteDocumentStore::open(paths.document_db.clone())?,
            notifier: HttpNotifier::new(&settings.notifications)?,
            rebooter: CommandRebooter::new(settings.supervisor.reboot_command.clone()),
            fanout,
        };

        let mut station = Station::new(settings, parts)?;
        station.run().await;
        Ok::<_, anyhow::Error>(())
    })
}
