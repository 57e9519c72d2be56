use super::archive::{ArchiveWriter, WriterOptions, FLUSH_INTERVAL};
use super::date_filter::{format_day, DateFilterMode, DateRange};
use super::scanner::{DirectoryScanner, ScanOptions};
use super::{BackupError, BackupReport, ExtensionFilter};
use crate::utils::config::BackupConfig;
use crate::utils::resource_monitor::{platform_memory_limit, MemoryBudget, ProcessMemory};
use crate::utils::run_log::RunLogger;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

/// Filter settings resolved before the scan starts.
struct FilterSetup {
    extensions: ExtensionFilter,
    dates: DateRange,
    budget: MemoryBudget,
}

/// Drives one backup run: validate, scan, archive, report.
pub struct BackupManager {
    config: BackupConfig,
    warnings: Vec<String>,
    logger: RunLogger,
    run_id: String,
    started: bool,
    zip_path: Option<PathBuf>,
}

impl BackupManager {
    pub fn new(config: BackupConfig, logger: RunLogger) -> Self {
        Self {
            config,
            warnings: Vec::new(),
            logger,
            run_id: uuid::Uuid::new_v4().to_string(),
            started: false,
            zip_path: None,
        }
    }

    /// Validation warnings to replay into the run log when the run starts.
    pub fn with_warnings(mut self, warnings: Vec<String>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    pub fn auto_start(&self) -> bool {
        self.config.auto_start
    }

    pub fn log_file_path(&self) -> &Path {
        self.logger.path()
    }

    pub fn log_file_name(&self) -> String {
        self.logger.file_name()
    }

    /// Archive written by the last successful run.
    pub fn zip_path(&self) -> Option<&Path> {
        self.zip_path.as_deref()
    }

    /// Run the whole pipeline. A manager runs at most once.
    pub fn start(&mut self) -> Result<BackupReport, BackupError> {
        if self.started {
            self.logger.log("Backup process already started");
            return Err(BackupError::AlreadyStarted);
        }
        self.started = true;

        info!("Starting backup run {}", self.run_id);
        let result = self.run();
        if let Err(e) = &result {
            error!("Backup run {} failed: {}", self.run_id, e);
            self.logger.log(e.to_string());
            self.logger.log("Backup Process Stopped...");
        }
        result
    }

    fn run(&mut self) -> Result<BackupReport, BackupError> {
        let started_at = Instant::now();
        let log = &self.logger;

        log.log("==================== Backup Process Started ====================");
        for warning in &self.warnings {
            log.log(warning);
        }

        let target = self.check_target()?;
        let setup = self.setup_filters()?;

        log.log(format!("Scanning directory {}", target.display()));
        let scanner = DirectoryScanner::new(ScanOptions {
            relative_paths: true,
            include_dotfiles: self.config.include_dotfiles,
            exclude_dirs: self.config.exclude_dirs.clone(),
            extensions: setup.extensions,
            dates: setup.dates,
        });
        let outcome = scanner.scan(&target, log)?;

        let unreadable = outcome.unreadable();
        log.log(format!("Total files scanned: {}", outcome.entries.len()));
        log.log(format!("Unreadable files logged: {}", unreadable));

        if outcome.entries.is_empty() {
            return Err(BackupError::EmptyManifest);
        }

        let mut writer = ArchiveWriter::new(
            WriterOptions {
                destination: self.config.destination_dir.clone(),
                use_relative_names: true,
                compress: self.config.use_compression,
                replace_existing: self.config.replace,
                custom_name: self.config.custom_name.clone(),
                budget: setup.budget,
                flush_interval: FLUSH_INTERVAL,
            },
            Box::new(ProcessMemory::new()),
        );
        let written = writer.write(&outcome.entries, &target, log)?;

        let elapsed = started_at.elapsed();
        log.log("Backup Process Succeeded.");
        log.log(format!("ZIP File: {}", written.archive_path.display()));
        log.log(format!("Log File: {}", log.path().display()));
        log.log(format!(
            "Elapsed: {}",
            humantime::format_duration(std::time::Duration::from_secs(elapsed.as_secs()))
        ));

        let report = BackupReport {
            run_id: self.run_id.clone(),
            archive_path: written.archive_path.clone(),
            log_path: log.path().to_path_buf(),
            files_scanned: outcome.entries.len(),
            unreadable,
            excluded: outcome.counters,
            added: written.added,
            skipped: written.skipped,
            flushes: written.flushes,
            elapsed,
        };
        self.zip_path = Some(written.archive_path);
        Ok(report)
    }

    fn check_target(&self) -> Result<PathBuf, BackupError> {
        let target = &self.config.target_dir;
        if target.as_os_str().is_empty() {
            return Err(BackupError::TargetNotSet);
        }
        if !target.is_dir() || std::fs::read_dir(target).is_err() {
            return Err(BackupError::TargetMissing(target.clone()));
        }
        self.logger.log(format!("Target directory: {}", target.display()));
        Ok(target.clone())
    }

    fn setup_filters(&self) -> Result<FilterSetup, BackupError> {
        let log = &self.logger;

        let extensions = self.config.extension_filter()?;
        match &extensions {
            ExtensionFilter::Any => {}
            ExtensionFilter::Exclude(set) => {
                log.log(format!("Excluded extensions: {}", join_set(set)))
            }
            ExtensionFilter::Include(set) => {
                log.log(format!("Included extensions: {}", join_set(set)))
            }
        }

        let dates = DateRange::resolve(&self.config.before_date, &self.config.after_date)?;
        log.log(format!("Date filter mode: {}", dates.mode));
        match dates.mode {
            DateFilterMode::All => {}
            _ => {
                if let Some(after) = dates.after {
                    log.log(format!("Files modified after: {}", format_day(after)));
                }
                if let Some(before) = dates.before {
                    log.log(format!("Files modified before: {}", format_day(before)));
                }
            }
        }

        if !self.config.exclude_dirs.is_empty() {
            log.log(format!(
                "Excluding {} directory pattern(s)",
                self.config.exclude_dirs.len()
            ));
        }

        let budget =
            MemoryBudget::resolve(self.config.memory_cap.as_deref(), platform_memory_limit())?;
        log.log(format!(
            "Memory target {} bytes, flush threshold {} bytes",
            budget.target_bytes, budget.threshold_bytes
        ));

        Ok(FilterSetup {
            extensions,
            dates,
            budget,
        })
    }
}

fn join_set(set: &std::collections::BTreeSet<String>) -> String {
    set.iter()
        .map(|e| if e.is_empty() { "(none)" } else { e.as_str() })
        .collect::<Vec<_>>()
        .join(", ")
}
