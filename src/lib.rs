//! Filtered, memory-bounded ZIP snapshots of a directory tree.
//!
//! [`backup::BackupManager`] drives one run: validate the configuration, scan
//! the target, write the archive with periodic flush cycles and report.

pub mod backup;
pub mod utils;

pub use backup::{BackupError, BackupManager, BackupReport};
pub use utils::config::{BackupConfig, Validated};
