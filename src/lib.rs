// pzkeeper - Unattended restart scheduler and mod tooling for Project Zomboid servers
//
// This is the library crate containing the core business logic and data structures.
// The binary crate (main.rs) provides the command line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod scheduler;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::ConfigManager;
pub use metrics::SchedulerMetrics;
pub use models::{InstanceConfig, ModInfo, WorkshopItem};
pub use scheduler::{Clock, Scheduler, SystemClock};
pub use state::{RunState, StateChange, StateManager};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
