use super::size::parse_byte_size;
use crate::backup::BackupError;
use sysinfo::{Pid, System};
use tracing::{debug, warn};

/// Start flushing once usage reaches this share of the budget.
pub const SAFETY_FACTOR: f64 = 0.8;

/// Budget used when the platform reports no limit.
pub const DEFAULT_CAP: &str = "256M";

/// Source of "how much memory is this process using right now".
pub trait MemoryProbe {
    fn current_usage(&mut self) -> u64;
}

/// Resident memory of the current process, read through sysinfo.
pub struct ProcessMemory {
    system: System,
    pid: Option<Pid>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Cannot resolve current pid, memory checks disabled: {}", e);
                None
            }
        };

        Self {
            system: System::new(),
            pid,
        }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn current_usage(&mut self) -> u64 {
        let Some(pid) = self.pid else {
            return 0;
        };

        if !self.system.refresh_process(pid) {
            return 0;
        }

        self.system.process(pid).map(|p| p.memory()).unwrap_or(0)
    }
}

/// Resolved memory budget for the archive stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBudget {
    pub target_bytes: u64,
    pub threshold_bytes: u64,
}

impl MemoryBudget {
    pub fn from_target(target_bytes: u64) -> Self {
        Self {
            target_bytes,
            threshold_bytes: (target_bytes as f64 * SAFETY_FACTOR) as u64,
        }
    }

    /// Pick the target: a configured cap (which may not exceed the platform
    /// limit), else the platform limit, else [`DEFAULT_CAP`].
    pub fn resolve(cap: Option<&str>, platform_limit: Option<u64>) -> Result<Self, BackupError> {
        let target = match cap.map(str::trim).filter(|c| !c.is_empty()) {
            Some(cap) => {
                let bytes = parse_byte_size(cap);
                if bytes == 0 {
                    return Err(BackupError::InvalidMemoryCap {
                        cap: cap.to_string(),
                        reason: "does not describe a positive size".to_string(),
                    });
                }
                if let Some(limit) = platform_limit {
                    if bytes > limit {
                        return Err(BackupError::InvalidMemoryCap {
                            cap: cap.to_string(),
                            reason: format!("exceeds the process memory limit of {} bytes", limit),
                        });
                    }
                }
                bytes
            }
            None => platform_limit.unwrap_or_else(|| parse_byte_size(DEFAULT_CAP)),
        };

        debug!("Memory target {} bytes", target);
        Ok(Self::from_target(target))
    }
}

/// Address-space limit of this process, or None when unlimited.
#[cfg(unix)]
pub fn platform_memory_limit() -> Option<u64> {
    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };

    // SAFETY: getrlimit only writes into the struct we pass.
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut limit) };
    if rc != 0 || limit.rlim_cur == libc::RLIM_INFINITY {
        return None;
    }

    Some(limit.rlim_cur as u64)
}

#[cfg(not(unix))]
pub fn platform_memory_limit() -> Option<u64> {
    None
}

/// Hand freed heap pages back to the OS after a flush.
pub fn reclaim() {
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    {
        // SAFETY: malloc_trim has no preconditions.
        unsafe {
            libc::malloc_trim(0);
        }
    }
}
