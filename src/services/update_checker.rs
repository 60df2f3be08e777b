//! Detects workshop items whose remote version is newer than the installed one.

use crate::models::InstanceConfig;
use crate::services::server_ini::ServerIni;
use crate::services::workshop::{MetadataCache, WorkshopApi, WorkshopDetails};
use anyhow::{Context, Result};
use camino::Utf8Path;
use indexmap::IndexMap;
use regex::Regex;
use std::fs;
use std::sync::LazyLock;

static ITEM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"(\d+)"$"#).expect("valid item id regex"));

static TIME_UPDATED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"^"timeupdated"\s+"(\d+)""#).expect("valid timeupdated regex"));

/// Installed workshop item timestamps keyed by workshop id.
pub type LocalTimestamps = IndexMap<String, i64>;

/// Parse the `WorkshopItemsInstalled` section of Steam's workshop manifest.
///
/// The manifest is a nested key/value text format. Scanning starts at the
/// `"WorkshopItemsInstalled"` line; a line holding only a quoted number opens
/// an item and the next `"timeupdated"` line records its timestamp. Lines
/// before the section are ignored.
pub fn parse_manifest(contents: &str) -> LocalTimestamps {
    let mut timestamps = LocalTimestamps::new();
    let mut in_section = false;
    let mut current_id: Option<String> = None;

    for line in contents.lines() {
        let line = line.trim();
        if line.contains("\"WorkshopItemsInstalled\"") {
            in_section = true;
            continue;
        }
        if !in_section {
            continue;
        }

        if let Some(caps) = ITEM_ID_RE.captures(line) {
            current_id = Some(caps[1].to_string());
        } else if let Some(id) = &current_id {
            if let Some(caps) = TIME_UPDATED_RE.captures(line) {
                if let Ok(ts) = caps[1].parse::<i64>() {
                    timestamps.insert(id.clone(), ts);
                }
            }
        }
    }

    timestamps
}

/// Read and parse the workshop manifest. A missing file yields no timestamps.
pub fn load_manifest(path: &Utf8Path) -> Result<LocalTimestamps> {
    if !path.exists() {
        tracing::debug!("Workshop manifest not found: {}", path);
        return Ok(LocalTimestamps::new());
    }
    let bytes =
        fs::read(path).with_context(|| format!("Failed to read workshop manifest: {}", path))?;
    Ok(parse_manifest(&String::from_utf8_lossy(&bytes)))
}

/// Active items whose remote `time_updated` is newer than the installed one.
///
/// An item missing from `local` counts as installed at time 0; an item
/// missing from `remote` is never reported.
pub fn find_updates(
    active: &[String],
    local: &LocalTimestamps,
    remote: &WorkshopDetails,
) -> Vec<String> {
    active
        .iter()
        .filter(|id| {
            let Some(item) = remote.get(id.as_str()) else {
                return false;
            };
            let installed = local.get(id.as_str()).copied().unwrap_or(0);
            item.time_updated > installed
        })
        .cloned()
        .collect()
}

/// Compares installed workshop content against the live catalog.
pub struct UpdateChecker<A> {
    cache: MetadataCache<A>,
}

impl<A: WorkshopApi> UpdateChecker<A> {
    pub fn new(cache: MetadataCache<A>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &MetadataCache<A> {
        &self.cache
    }

    /// Workshop ids of the instance that have a newer remote version.
    ///
    /// Always refreshes remote metadata. Returns an empty list when the
    /// server ini lists no items, nothing is installed, or the catalog
    /// returned nothing.
    pub async fn check(&mut self, config: &InstanceConfig) -> Result<Vec<String>> {
        let ini_path = config.server_ini_path();
        let ini = if ini_path.exists() {
            ServerIni::load(&ini_path)?
        } else {
            tracing::debug!("Server ini not found: {}", ini_path);
            ServerIni::default()
        };

        if ini.workshop_items.is_empty() {
            return Ok(Vec::new());
        }

        let local = load_manifest(&config.workshop_manifest_path())?;
        if local.is_empty() {
            return Ok(Vec::new());
        }

        let remote = self.cache.get_details(&ini.workshop_items, true).await;
        if remote.is_empty() {
            return Ok(Vec::new());
        }

        let updated = find_updates(&ini.workshop_items, &local, &remote);
        for id in &updated {
            tracing::info!("Workshop item {} ({}) has an update", id, self.cache.title(id));
        }
        Ok(updated)
    }
}
