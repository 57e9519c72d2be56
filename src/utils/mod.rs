pub mod config;
pub mod logging;
pub mod params;
pub mod resource_monitor;
pub mod run_log;
pub mod size;

pub use resource_monitor::{MemoryBudget, MemoryProbe, ProcessMemory};
pub use run_log::{ConsoleFormat, RunLogger};
