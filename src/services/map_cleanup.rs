use crate::logging::EventLog;
use crate::models::InstanceConfig;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;

/// Per-cell save files removed for every reset zone key.
pub const CELL_FILE_PREFIXES: [&str; 3] = ["map", "chunkdata", "zpop"];

/// Result of one map cleanup pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// No reset zone list was found.
    NoZoneList,
    /// The save directory does not exist.
    NoSaveDir(Utf8PathBuf),
    /// The zone list exists but couldn't be read.
    Unreadable(Utf8PathBuf),
    Completed { deleted: usize, failed: usize },
}

impl CleanupOutcome {
    pub fn deleted(&self) -> usize {
        match self {
            CleanupOutcome::Completed { deleted, .. } => *deleted,
            _ => 0,
        }
    }
}

/// Location of the reset zone list: `Zomboid/Lua/reset_zones.txt`, falling
/// back to `Zomboid/reset_zones.txt`.
pub fn zone_list_path(install_dir: &Utf8Path) -> Option<Utf8PathBuf> {
    [
        install_dir.join("Zomboid").join("Lua").join("reset_zones.txt"),
        install_dir.join("Zomboid").join("reset_zones.txt"),
    ]
    .into_iter()
    .find(|path| path.exists())
}

/// Cell keys (`"<x>_<y>"`) listed one per line. Blank lines are ignored, as
/// are keys that could name a path outside the save directory.
pub fn parse_zone_keys(contents: &str) -> Vec<String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .filter(|key| {
            let safe = !key.contains(['/', '\\']) && !key.contains("..");
            if !safe {
                tracing::warn!("Ignoring suspicious reset zone key: {}", key);
            }
            safe
        })
        .map(str::to_string)
        .collect()
}

/// Delete the save files of every listed reset zone so the server regenerates
/// those cells on the next start.
///
/// Missing prerequisites skip the pass; a file that can't be removed is logged
/// and the remaining deletions continue. Each outcome is recorded in the
/// instance event log.
pub fn cleanup_reset_zones(config: &InstanceConfig, events: &EventLog) -> CleanupOutcome {
    let Some(list_file) = zone_list_path(&config.install_dir) else {
        let msg = format!(
            "Reset zone list not found under {}. Skipping cleanup.",
            config.install_dir.join("Zomboid")
        );
        tracing::info!("{}", msg);
        events.record(&msg);
        return CleanupOutcome::NoZoneList;
    };

    let save_dir = config.save_dir();
    if !save_dir.is_dir() {
        let msg = format!("Save dir not found: {}", save_dir);
        tracing::info!("{}", msg);
        events.record(&msg);
        return CleanupOutcome::NoSaveDir(save_dir);
    }

    let contents = match fs::read_to_string(&list_file) {
        Ok(contents) => contents,
        Err(e) => {
            let msg = format!("Failed to read {}: {}", list_file, e);
            tracing::error!("{}", msg);
            events.record(&msg);
            return CleanupOutcome::Unreadable(list_file);
        }
    };

    let mut deleted = 0;
    let mut failed = 0;

    for key in parse_zone_keys(&contents) {
        for prefix in CELL_FILE_PREFIXES {
            let path = save_dir.join(format!("{}_{}.bin", prefix, key));
            if !path.exists() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::debug!("Deleted {}", path);
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to delete {}: {}", path, e);
                    failed += 1;
                }
            }
        }
    }

    let mut msg = format!("Cleanup Complete. Deleted {} map/chunk files.", deleted);
    if failed > 0 {
        msg.push_str(&format!(" {} could not be deleted.", failed));
    }
    tracing::info!("{}", msg);
    events.record(&msg);

    CleanupOutcome::Completed { deleted, failed }
}
