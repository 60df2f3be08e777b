//! Data models for pzkeeper.
//!
//! - [`InstanceConfig`]: per-instance settings loaded from `instances/<name>.yaml`
//! - [`WorkshopItem`]: cached Steam Workshop metadata (title, update time, dependencies)
//! - [`ModInfo`]: one mod folder inside a downloaded workshop item, parsed from `mod.info`
//! - [`STEAM_APP_ID`]: the Project Zomboid app id used in workshop paths

pub mod config;
pub mod workshop;

pub use config::{DEFAULT_INSTANCE, DEFAULT_RESTART_TIMES, InstanceConfig};
pub use workshop::{ModInfo, WorkshopItem};

/// Steam application id of Project Zomboid (workshop content and manifest paths).
pub const STEAM_APP_ID: &str = "108600";
