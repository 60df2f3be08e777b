use serde::{Deserialize, Serialize};

/// Cached metadata for a single Steam Workshop item.
///
/// Stored in the workshop cache file keyed by the item's identifier, so the
/// identifier itself is not part of the serialized value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkshopItem {
    #[serde(default = "default_title")]
    pub title: String,

    /// Last remote update, seconds since the Unix epoch
    #[serde(default)]
    pub time_updated: i64,

    /// Workshop IDs this item declares as required, in declared order
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// When this entry was fetched, seconds since the Unix epoch
    #[serde(default)]
    pub fetched_at: i64,
}

impl WorkshopItem {
    pub fn new(title: impl Into<String>, time_updated: i64, dependencies: Vec<String>) -> Self {
        Self {
            title: title.into(),
            time_updated,
            dependencies,
            fetched_at: 0,
        }
    }
}

fn default_title() -> String {
    "Unknown".to_string()
}

/// A mod folder found inside a downloaded workshop item, described by its `mod.info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModInfo {
    /// Mod identifier (`id=`), or the folder name when the field is missing
    pub id: String,

    /// Workshop item that ships this mod
    pub workshop_id: String,

    /// Required mod identifiers (`require=`), in declared order, without duplicates
    pub requires: Vec<String>,
}
