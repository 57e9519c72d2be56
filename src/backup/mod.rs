pub mod archive;
pub mod date_filter;
pub mod manager;
pub mod scanner;
pub mod session;

pub use archive::{ArchiveError, ArchiveWriter, WriteReport, WriterOptions};
pub use date_filter::{DateFilterMode, DateParseError, DateRange};
pub use manager::BackupManager;
pub use scanner::{DirectoryScanner, ScanError, ScanOptions};
pub use session::{ArchiveSession, SessionError};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// One candidate file produced by a scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Root-relative or absolute path, depending on the scan mode
    pub path: String,
    pub readable: bool,
}

/// Per-scan exclusion counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanCounters {
    pub excluded_dirs: u64,
    pub excluded_files: u64,
}

/// Ordered manifest plus the counters gathered while building it.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub entries: Vec<FileEntry>,
    pub counters: ScanCounters,
}

impl ScanOutcome {
    pub fn unreadable(&self) -> usize {
        self.entries.iter().filter(|e| !e.readable).count()
    }
}

/// Extension policy for a scan. Inclusion and exclusion never coexist.
/// The empty string stands for "file has no extension".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionFilter {
    Any,
    Exclude(BTreeSet<String>),
    Include(BTreeSet<String>),
}

impl ExtensionFilter {
    pub fn allows(&self, extension: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exclude(set) => !set.contains(extension),
            Self::Include(set) => set.contains(extension),
        }
    }
}

/// Summary of one successful run.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub run_id: String,
    pub archive_path: PathBuf,
    pub log_path: PathBuf,
    pub files_scanned: usize,
    pub unreadable: usize,
    pub excluded: ScanCounters,
    pub added: u64,
    pub skipped: u64,
    pub flushes: u64,
    #[serde(with = "elapsed_text")]
    pub elapsed: Duration,
}

/// Conditions that halt a run.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("backup target directory is not set")]
    TargetNotSet,

    #[error("Dir : {} unreadable", .0.display())]
    TargetMissing(PathBuf),

    #[error("file extensions exclusion ({excluded}) and inclusion ({included}) cannot be used together")]
    ConflictingExtensionFilters { excluded: usize, included: usize },

    #[error(transparent)]
    InvalidDate(#[from] DateParseError),

    #[error("memoryCap {cap} is invalid: {reason}")]
    InvalidMemoryCap { cap: String, reason: String },

    #[error("an error occurred while scanning directories: {0}")]
    Scan(#[from] ScanError),

    #[error("Files returned zero")]
    EmptyManifest,

    #[error("error when zipping files: {0}")]
    Archive(#[from] ArchiveError),

    #[error("backup process already started")]
    AlreadyStarted,
}

mod elapsed_text {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }
}
