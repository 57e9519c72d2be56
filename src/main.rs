use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::info;

use zip_backup::utils::config::load_params;
use zip_backup::utils::logging::init_tracing;
use zip_backup::utils::run_log::{ConsoleFormat, RunLogger};
use zip_backup::{BackupConfig, BackupManager};

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    init_tracing();

    let config_path = std::env::var_os("BACKUP_CONFIG").map(PathBuf::from);
    let raw = load_params(config_path.as_deref())?;
    let validated = BackupConfig::from_params(&raw);

    info!("Starting Zip Backup v{}", env!("CARGO_PKG_VERSION"));

    let log_dir = validated
        .config
        .log_dir
        .clone()
        .unwrap_or_else(default_log_dir);
    let logger = RunLogger::create(
        &log_dir,
        validated.config.custom_name.as_deref(),
        ConsoleFormat::detect(),
    );

    let start_override = std::env::var("BACKUP_START").ok();
    let should_start = validated.config.should_start(start_override.as_deref());

    let mut manager = BackupManager::new(validated.config, logger).with_warnings(validated.warnings);
    info!("Run {} logging to {}", manager.run_id(), manager.log_file_name());

    if !should_start {
        info!(
            "autoStart is disabled for {}; set BACKUP_START=1 to run it",
            manager.config().target_dir.display()
        );
        return Ok(());
    }

    // The pipeline is synchronous filesystem work
    let (manager, result) = tokio::task::spawn_blocking(move || {
        let result = manager.start();
        (manager, result)
    })
    .await
    .context("Backup task panicked")?;
    let report = result?;

    info!(
        "Backup {} finished: {} added, {} skipped, {} flushes, archive {}",
        report.run_id,
        report.added,
        report.skipped,
        report.flushes,
        manager
            .zip_path()
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    );
    tracing::debug!("{}", serde_json::to_string(&report)?);

    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join("zip-backup").join("log"))
        .unwrap_or_else(|| PathBuf::from("log"))
}
