use super::{DateRange, ExtensionFilter, FileEntry, ScanCounters, ScanOutcome};
use crate::utils::run_log::RunLogger;
use std::cell::Cell;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Directory not found or not readable: {}", .0.display())]
    NotReadable(PathBuf),

    #[error("Exception during directory scan: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Filters applied while walking the tree.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Report paths relative to the scan root instead of absolute
    pub relative_paths: bool,
    pub include_dotfiles: bool,
    /// Substrings; any entry whose full path contains one is pruned
    pub exclude_dirs: Vec<String>,
    pub extensions: ExtensionFilter,
    pub dates: DateRange,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            relative_paths: true,
            include_dotfiles: false,
            exclude_dirs: Vec::new(),
            extensions: ExtensionFilter::Any,
            dates: DateRange::default(),
        }
    }
}

pub struct DirectoryScanner {
    options: ScanOptions,
}

impl DirectoryScanner {
    pub fn new(options: ScanOptions) -> Self {
        Self { options }
    }

    /// Walk `root` depth-first and return the filtered, sorted manifest.
    pub fn scan(&self, root: &Path, log: &RunLogger) -> Result<ScanOutcome, ScanError> {
        if !root.is_dir() || fs::read_dir(root).is_err() {
            return Err(ScanError::NotReadable(root.to_path_buf()));
        }

        info!("Scanning {}", root.display());

        let excluded_dirs = Cell::new(0u64);
        let mut excluded_files = 0u64;
        let mut entries = Vec::new();

        let walker = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !self.is_excluded_path(e.path()) {
                    return true;
                }
                log.log(format!("{} excluded.", e.path().display()));
                excluded_dirs.set(excluded_dirs.get() + 1);
                false
            });

        for entry in walker {
            let entry = entry?;

            if !entry.file_type().is_file() {
                continue;
            }

            let name = entry.file_name().to_string_lossy();
            if !self.options.include_dotfiles && name.starts_with('.') {
                debug!("Skipping dotfile {}", entry.path().display());
                continue;
            }

            let extension = extension_of(entry.path());
            if !self.options.extensions.allows(&extension) {
                match self.options.extensions {
                    ExtensionFilter::Include(_) => {
                        log.log(format!("File {} is not included.", entry.path().display()))
                    }
                    _ => log.log(format!("{} excluded.", entry.path().display())),
                }
                excluded_files += 1;
                continue;
            }

            if self.options.dates.is_active() {
                let mtime = modified_secs(&entry)?;
                if !self.options.dates.contains(mtime) {
                    log.log(format!(
                        "File {} excluded. {} excluded",
                        entry.path().display(),
                        super::date_filter::format_day(mtime)
                    ));
                    excluded_files += 1;
                    continue;
                }
            }

            let path = entry.path();
            let readable = File::open(path).is_ok();
            if !readable {
                log.log(format!("Unreadable file detected: {}", path.display()));
            }

            entries.push(FileEntry {
                path: self.display_path(root, path),
                readable,
            });
        }

        sort_manifest(&mut entries);

        let counters = ScanCounters {
            excluded_dirs: excluded_dirs.get(),
            excluded_files,
        };
        log.log(format!(
            "Excluded dir:{}. Excluded files:{}",
            counters.excluded_dirs, counters.excluded_files
        ));

        Ok(ScanOutcome { entries, counters })
    }

    fn is_excluded_path(&self, path: &Path) -> bool {
        if self.options.exclude_dirs.is_empty() {
            return false;
        }
        let full = path.to_string_lossy();
        self.options
            .exclude_dirs
            .iter()
            .any(|needle| full.contains(needle.as_str()))
    }

    fn display_path(&self, root: &Path, path: &Path) -> String {
        if self.options.relative_paths {
            if let Ok(rel) = path.strip_prefix(root) {
                return rel.to_string_lossy().to_string();
            }
        }
        path.to_string_lossy().to_string()
    }
}

/// Lowercased extension; files without one get the empty string.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Case-insensitive order with the exact path as tie-breaker, so the result
/// does not depend on directory iteration order.
pub fn sort_manifest(entries: &mut [FileEntry]) {
    entries.sort_by_cached_key(|e| (e.path.to_lowercase(), e.path.clone()));
}

fn modified_secs(entry: &DirEntry) -> Result<i64, walkdir::Error> {
    let metadata = entry.metadata()?;
    let secs = match metadata.modified().map(|t| t.duration_since(UNIX_EPOCH)) {
        Ok(Ok(since)) => since.as_secs() as i64,
        Ok(Err(before)) => -(before.duration().as_secs() as i64),
        Err(e) => {
            debug!("No mtime for {}: {}", entry.path().display(), e);
            0
        }
    };
    Ok(secs)
}
