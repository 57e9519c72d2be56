//! Streams a manifest into a zip archive while keeping memory bounded.
//!
//! The writer periodically closes the archive, lets the allocator give memory
//! back, and reopens the same file in append mode. The trigger is either a
//! fixed number of entries or the process crossing its memory threshold.

use super::session::{ArchiveSession, SessionError};
use super::FileEntry;
use crate::utils::resource_monitor::{self, MemoryBudget, MemoryProbe};
use crate::utils::run_log::RunLogger;
use chrono::{DateTime, Datelike, Local, Timelike};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::CompressionMethod;

/// Entries between unconditional flush cycles.
pub const FLUSH_INTERVAL: u64 = 500;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Failed to create zip archive at {}: {source}", path.display())]
    Create { path: PathBuf, source: SessionError },

    #[error("Unable to reopen zip archive for append: {}: {source}", path.display())]
    Reopen { path: PathBuf, source: SessionError },

    #[error("Failed to finalize zip archive {}: {source}", path.display())]
    Finish { path: PathBuf, source: SessionError },
}

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// Output directory (None = current directory)
    pub destination: Option<PathBuf>,
    /// Store paths relative to the base directory instead of bare file names
    pub use_relative_names: bool,
    pub compress: bool,
    pub replace_existing: bool,
    pub custom_name: Option<String>,
    pub budget: MemoryBudget,
    pub flush_interval: u64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            destination: None,
            use_relative_names: true,
            compress: true,
            replace_existing: false,
            custom_name: None,
            budget: MemoryBudget::from_target(256 * 1024 * 1024),
            flush_interval: FLUSH_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteReport {
    pub archive_path: PathBuf,
    pub added: u64,
    pub skipped: u64,
    /// Number of close/reopen cycles performed
    pub flushes: u64,
}

pub struct ArchiveWriter {
    options: WriterOptions,
    probe: Box<dyn MemoryProbe + Send>,
}

impl ArchiveWriter {
    pub fn new(options: WriterOptions, probe: Box<dyn MemoryProbe + Send>) -> Self {
        Self { options, probe }
    }

    /// Pick the output path, creating the destination directory when needed.
    /// An existing archive of the same name is removed when replacing.
    pub fn prepare_path(&self, log: &RunLogger) -> PathBuf {
        let dir = resolve_destination(self.options.destination.as_deref());
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let name = archive_name(
            &stamp,
            self.options.custom_name.as_deref(),
            self.options.replace_existing,
        );
        log.log(format!("Creating Zip with filename {}", name));

        let path = dir.join(format!("{}.zip", name));
        if self.options.replace_existing && path.exists() {
            match fs::remove_file(&path) {
                Ok(()) => log.log("Old File Deleted"),
                Err(e) => warn!("Could not delete old archive {}: {}", path.display(), e),
            }
        }
        path
    }

    /// Write every readable entry of `entries` (resolved against `base_dir`)
    /// into a fresh archive.
    pub fn write(
        &mut self,
        entries: &[FileEntry],
        base_dir: &Path,
        log: &RunLogger,
    ) -> Result<WriteReport, ArchiveError> {
        let archive_path = self.prepare_path(log);
        log.log(format!("ZIP process started. Target zip: {}", archive_path.display()));
        log.log(format!(
            "ZIP compression is set to {}",
            if self.options.compress { "TRUE" } else { "FALSE" }
        ));

        let mut session =
            ArchiveSession::create(&archive_path).map_err(|source| ArchiveError::Create {
                path: archive_path.clone(),
                source,
            })?;

        let method = compression_method(self.options.compress);
        let threshold = self.options.budget.threshold_bytes;
        let interval = self.options.flush_interval.max(1);

        let mut added = 0u64;
        let mut skipped = 0u64;
        let mut iteration = 0u64;

        for entry in entries {
            iteration += 1;

            let file_path = resolve_entry(base_dir, &entry.path);
            if !entry.readable || File::open(&file_path).is_err() {
                log.log(format!(
                    "Unreadable or missing file skipped: {}",
                    file_path.display()
                ));
                skipped += 1;
                continue;
            }

            let local_name = archive_entry_name(&file_path, base_dir, self.options.use_relative_names);
            log.log(format!("Adding file: {}", local_name));

            let options = entry_options(&file_path, method);
            if let Err(e) = session.add_file(&file_path, &local_name, options) {
                log.log(format!(
                    "Failed to add file to zip: {} as {} ({})",
                    file_path.display(),
                    local_name,
                    e
                ));
                skipped += 1;
                continue;
            }
            added += 1;

            let usage = self.probe.current_usage();
            if iteration % interval == 0 || usage >= threshold {
                log.log(format!(
                    "Memory check at iteration {}: usage={} bytes, threshold={} bytes. Flushing zip. Please wait..",
                    iteration, usage, threshold
                ));
                if let Err(e) = self.flush(&mut session) {
                    if matches!(e, ArchiveError::Reopen { .. }) {
                        log.log("Unable to reopen zip archive for append");
                    }
                    return Err(e);
                }
            }
        }

        session.close().map_err(|source| ArchiveError::Finish {
            path: archive_path.clone(),
            source,
        })?;
        resource_monitor::reclaim();

        log.log(format!(
            "ZIP process completed. Added: {}; Skipped: {}",
            added, skipped
        ));
        info!(
            "Archive {} written: {} added, {} skipped, {} flushes",
            archive_path.display(),
            added,
            skipped,
            session.reopen_count()
        );

        Ok(WriteReport {
            archive_path,
            added,
            skipped,
            flushes: session.reopen_count(),
        })
    }

    /// Close, reclaim, reopen. Entries written before the close stay valid
    /// even when the reopen fails.
    fn flush(&mut self, session: &mut ArchiveSession) -> Result<(), ArchiveError> {
        let path = session.path().to_path_buf();

        session.close().map_err(|source| ArchiveError::Finish {
            path: path.clone(),
            source,
        })?;
        resource_monitor::reclaim();

        session
            .reopen()
            .map_err(|source| ArchiveError::Reopen { path, source })?;

        debug!(
            "Flush cycle {} done, usage now {} bytes",
            session.reopen_count(),
            self.probe.current_usage()
        );
        Ok(())
    }
}

/// Empty or missing destination falls back to the working directory; a
/// directory that cannot be created falls back to the system temp dir.
pub fn resolve_destination(destination: Option<&Path>) -> PathBuf {
    let dir = match destination.filter(|d| !d.as_os_str().is_empty()) {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    if dir.is_dir() {
        return dir;
    }

    match fs::create_dir_all(&dir) {
        Ok(()) => dir,
        Err(e) => {
            warn!(
                "Cannot create destination {}: {}. Using temp dir",
                dir.display(),
                e
            );
            std::env::temp_dir()
        }
    }
}

/// Base name of the archive (without `.zip`).
pub fn archive_name(stamp: &str, custom_name: Option<&str>, replace: bool) -> String {
    let custom = custom_name
        .map(|n| n.replace(['/', '\\'], "_"))
        .filter(|n| !n.is_empty());

    match (custom, replace) {
        (Some(name), true) => name,
        (Some(name), false) => format!("{}_{}", stamp, name),
        (None, _) => stamp.to_string(),
    }
}

fn resolve_entry(base_dir: &Path, stored: &str) -> PathBuf {
    let stored = Path::new(stored);
    if stored.is_absolute() || base_dir.as_os_str().is_empty() {
        stored.to_path_buf()
    } else {
        base_dir.join(stored)
    }
}

/// Name inside the archive: the path below `base_dir` with `/` separators,
/// or just the file name.
pub fn archive_entry_name(file_path: &Path, base_dir: &Path, relative: bool) -> String {
    let base_name = || {
        file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    };

    if !relative || base_dir.as_os_str().is_empty() {
        return base_name();
    }

    match file_path.strip_prefix(base_dir) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => base_name(),
    }
}

#[cfg(feature = "compression")]
fn compression_method(compress: bool) -> CompressionMethod {
    if compress {
        CompressionMethod::Deflated
    } else {
        CompressionMethod::Stored
    }
}

#[cfg(not(feature = "compression"))]
fn compression_method(compress: bool) -> CompressionMethod {
    if compress {
        debug!("Built without the compression feature; storing entries");
    }
    CompressionMethod::Stored
}

fn entry_options(file_path: &Path, method: CompressionMethod) -> SimpleFileOptions {
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .large_file(is_large(file_path));

    match modified_zip_time(file_path) {
        Some(time) => options.last_modified_time(time),
        None => options,
    }
}

fn is_large(file_path: &Path) -> bool {
    fs::metadata(file_path)
        .map(|m| m.len() >= u32::MAX as u64)
        .unwrap_or(false)
}

fn modified_zip_time(file_path: &Path) -> Option<zip::DateTime> {
    let modified = fs::metadata(file_path).ok()?.modified().ok()?;
    let local: DateTime<Local> = modified.into();
    zip::DateTime::from_date_and_time(
        u16::try_from(local.year()).ok()?,
        local.month() as u8,
        local.day() as u8,
        local.hour() as u8,
        local.minute() as u8,
        local.second() as u8,
    )
    .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::run_log::ConsoleFormat;
    use std::collections::BTreeSet;
    use std::io::Read;
    use tempfile::TempDir;
    use zip::ZipArchive;

    struct FixedProbe(u64);

    impl MemoryProbe for FixedProbe {
        fn current_usage(&mut self) -> u64 {
            self.0
        }
    }

    fn quiet_log(dir: &TempDir) -> RunLogger {
        RunLogger::at(dir.path().join("archive.log"), ConsoleFormat::Off)
    }

    fn entry(path: &str) -> FileEntry {
        FileEntry {
            path: path.to_string(),
            readable: true,
        }
    }

    fn zip_names(path: &Path) -> BTreeSet<String> {
        let archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        archive.file_names().map(str::to_string).collect()
    }

    fn options_into(dest: &TempDir) -> WriterOptions {
        WriterOptions {
            destination: Some(dest.path().to_path_buf()),
            ..WriterOptions::default()
        }
    }

    #[test]
    fn test_writes_relative_names() {
        let src = TempDir::new().unwrap();
        fs::create_dir(src.path().join("docs")).unwrap();
        fs::write(src.path().join("a.txt"), "alpha").unwrap();
        fs::write(src.path().join("docs/b.txt"), "beta").unwrap();
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();

        let mut writer = ArchiveWriter::new(options_into(&dest), Box::new(FixedProbe(0)));
        let report = writer
            .write(&[entry("a.txt"), entry("docs/b.txt")], src.path(), &quiet_log(&logs))
            .unwrap();

        assert_eq!(report.added, 2);
        assert_eq!(report.skipped, 0);
        assert_eq!(report.flushes, 0);
        assert!(report.archive_path.starts_with(dest.path()));

        let names = zip_names(&report.archive_path);
        assert!(names.contains("a.txt"));
        assert!(names.contains("docs/b.txt"));

        let mut archive = ZipArchive::new(File::open(&report.archive_path).unwrap()).unwrap();
        let mut contents = String::new();
        archive
            .by_name("docs/b.txt")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "beta");
    }

    #[test]
    fn test_skips_unreadable_and_vanished_entries() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("kept.txt"), "k").unwrap();
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();

        let entries = vec![
            entry("kept.txt"),
            entry("vanished.txt"),
            FileEntry {
                path: "flagged.txt".into(),
                readable: false,
            },
        ];

        let mut writer = ArchiveWriter::new(options_into(&dest), Box::new(FixedProbe(0)));
        let report = writer.write(&entries, src.path(), &quiet_log(&logs)).unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(report.skipped, 2);
        assert_eq!(zip_names(&report.archive_path).len(), 1);
    }

    #[test]
    fn test_flush_cycle_under_memory_cap() {
        let src = TempDir::new().unwrap();
        let mut entries = Vec::new();
        for i in 0..2000 {
            let name = format!("f{:04}.txt", i);
            fs::write(src.path().join(&name), format!("file {}", i)).unwrap();
            entries.push(entry(&name));
        }
        entries.push(FileEntry {
            path: "f0000.txt".into(),
            readable: false,
        });
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();

        let options = WriterOptions {
            budget: MemoryBudget::resolve(Some("10M"), None).unwrap(),
            ..options_into(&dest)
        };
        let mut writer = ArchiveWriter::new(options, Box::new(FixedProbe(0)));
        let report = writer.write(&entries, src.path(), &quiet_log(&logs)).unwrap();

        assert!(report.flushes >= 1);
        assert_eq!(report.flushes, 4);
        assert_eq!(report.added, 2000);
        assert_eq!(report.skipped, 1);
        assert_eq!(zip_names(&report.archive_path).len(), 2000);
    }

    /// Moves the archive aside on its Nth reading and leaves a directory in
    /// its place, so the following reopen cannot succeed.
    struct MovingProbe {
        calls: u32,
        trip_at: u32,
        archive: PathBuf,
        moved_to: PathBuf,
    }

    impl MemoryProbe for MovingProbe {
        fn current_usage(&mut self) -> u64 {
            self.calls += 1;
            if self.calls != self.trip_at {
                return 0;
            }
            fs::rename(&self.archive, &self.moved_to).unwrap();
            fs::create_dir(&self.archive).unwrap();
            u64::MAX
        }
    }

    #[test]
    fn test_failed_reopen_halts_and_keeps_closed_archive() {
        let src = TempDir::new().unwrap();
        let entries: Vec<FileEntry> = (0..6)
            .map(|i| {
                let name = format!("r{}.txt", i);
                fs::write(src.path().join(&name), format!("row {}", i)).unwrap();
                entry(&name)
            })
            .collect();
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let log = quiet_log(&logs);

        let archive = dest.path().join("halt.zip");
        let moved_to = dest.path().join("moved.zip");
        let options = WriterOptions {
            replace_existing: true,
            custom_name: Some("halt".into()),
            ..options_into(&dest)
        };
        let probe = MovingProbe {
            calls: 0,
            trip_at: 3,
            archive: archive.clone(),
            moved_to: moved_to.clone(),
        };
        let mut writer = ArchiveWriter::new(options, Box::new(probe));

        let err = writer.write(&entries, src.path(), &log).unwrap_err();
        match err {
            ArchiveError::Reopen { path, .. } => assert_eq!(path, archive),
            other => panic!("unexpected error: {}", other),
        }

        // Everything added before the close is still a readable archive
        let names = zip_names(&moved_to);
        let expected: BTreeSet<String> =
            ["r0.txt", "r1.txt", "r2.txt"].iter().map(|s| s.to_string()).collect();
        assert_eq!(names, expected);

        let contents = fs::read_to_string(log.path()).unwrap();
        assert!(contents.contains("Unable to reopen zip archive for append"));
        assert!(!contents.contains("ZIP process completed"));
    }

    #[test]
    fn test_memory_pressure_flushes_every_entry() {
        let src = TempDir::new().unwrap();
        let entries: Vec<FileEntry> = (0..5)
            .map(|i| {
                let name = format!("p{}.txt", i);
                fs::write(src.path().join(&name), "x").unwrap();
                entry(&name)
            })
            .collect();
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();

        let options = WriterOptions {
            budget: MemoryBudget::from_target(1000),
            ..options_into(&dest)
        };
        let mut writer = ArchiveWriter::new(options, Box::new(FixedProbe(800)));
        let report = writer.write(&entries, src.path(), &quiet_log(&logs)).unwrap();

        assert_eq!(report.flushes, 5);
        assert_eq!(zip_names(&report.archive_path).len(), 5);
    }

    #[test]
    fn test_empty_manifest_gives_empty_archive() {
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();
        let mut writer = ArchiveWriter::new(options_into(&dest), Box::new(FixedProbe(0)));
        let report = writer.write(&[], dest.path(), &quiet_log(&logs)).unwrap();

        assert_eq!(report.added, 0);
        assert!(report.archive_path.exists());
        assert!(zip_names(&report.archive_path).is_empty());
    }

    #[test]
    fn test_stored_entries_when_uncompressed() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("plain.txt"), "aaaaaaaaaaaaaaaaaaaaaaaaaaaa").unwrap();
        let dest = TempDir::new().unwrap();
        let logs = TempDir::new().unwrap();

        let options = WriterOptions {
            compress: false,
            ..options_into(&dest)
        };
        let mut writer = ArchiveWriter::new(options, Box::new(FixedProbe(0)));
        let report = writer
            .write(&[entry("plain.txt")], src.path(), &quiet_log(&logs))
            .unwrap();

        let mut archive = ZipArchive::new(File::open(&report.archive_path).unwrap()).unwrap();
        let file = archive.by_name("plain.txt").unwrap();
        assert_eq!(file.compression(), CompressionMethod::Stored);
    }

    #[test]
    fn test_replace_uses_custom_name_and_overwrites() {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("a.txt"), "a").unwrap();
        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("nightly.zip"), "stale, not a zip").unwrap();
        let logs = TempDir::new().unwrap();

        let options = WriterOptions {
            replace_existing: true,
            custom_name: Some("nightly".into()),
            ..options_into(&dest)
        };
        let mut writer = ArchiveWriter::new(options, Box::new(FixedProbe(0)));
        let report = writer
            .write(&[entry("a.txt")], src.path(), &quiet_log(&logs))
            .unwrap();

        assert_eq!(report.archive_path, dest.path().join("nightly.zip"));
        assert_eq!(zip_names(&report.archive_path).len(), 1);
    }

    #[test]
    fn test_archive_name_rules() {
        assert_eq!(archive_name("20240101_000000", None, false), "20240101_000000");
        assert_eq!(archive_name("20240101_000000", None, true), "20240101_000000");
        assert_eq!(
            archive_name("20240101_000000", Some("site"), false),
            "20240101_000000_site"
        );
        assert_eq!(archive_name("20240101_000000", Some("site"), true), "site");
        assert_eq!(archive_name("s", Some("a/b"), true), "a_b");
    }

    #[test]
    fn test_entry_names() {
        let base = Path::new("/data/root");
        assert_eq!(
            archive_entry_name(Path::new("/data/root/x/y.txt"), base, true),
            "x/y.txt"
        );
        assert_eq!(
            archive_entry_name(Path::new("/data/root/x/y.txt"), base, false),
            "y.txt"
        );
        assert_eq!(
            archive_entry_name(Path::new("/elsewhere/z.txt"), base, true),
            "z.txt"
        );
    }

    #[test]
    fn test_destination_fallbacks() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a/b/c");
        assert_eq!(resolve_destination(Some(&nested)), nested);
        assert!(nested.is_dir());

        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();
        assert_eq!(
            resolve_destination(Some(&blocker.join("sub"))),
            std::env::temp_dir()
        );
    }
}
