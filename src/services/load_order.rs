//! Dependency-aware load order for active mods.
//!
//! Every workshop item ships one or more mod folders, each with a `mod.info`
//! file of `key=value` lines. The `id=` and `require=` keys define a directed
//! graph which is rebuilt from disk for every sort.

use crate::models::ModInfo;
use camino::Utf8Path;
use indexmap::IndexMap;
use std::collections::HashSet;
use std::fmt;
use std::fs;

/// Parse the contents of a `mod.info` file.
///
/// Missing or malformed fields fall back to the folder name as the id and to
/// no requirements. When a key repeats, the last occurrence wins.
pub fn parse_mod_info(contents: &str, folder_name: &str, workshop_id: &str) -> ModInfo {
    let mut id = folder_name.to_string();
    let mut requires = Vec::new();

    for line in contents.lines() {
        let line = line.trim_start();
        if let Some(value) = line.strip_prefix("id=") {
            let value = value.trim();
            if !value.is_empty() {
                id = value.to_string();
            }
        } else if let Some(value) = line.strip_prefix("require=") {
            requires.clear();
            for entry in value.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let entry = entry.to_string();
                if !requires.contains(&entry) {
                    requires.push(entry);
                }
            }
        }
    }

    ModInfo {
        id,
        workshop_id: workshop_id.to_string(),
        requires,
    }
}

/// Mod identifiers mapped to their declared requirements.
#[derive(Debug, Clone, Default)]
pub struct ModGraph {
    mods: IndexMap<String, ModInfo>,
}

impl ModGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from the downloaded content of `workshop_items`.
    ///
    /// Looks for `<content_dir>/<workshop id>/mods/<folder>/mod.info`.
    /// Folders without a `mod.info` are skipped; unreadable files are logged
    /// and treated as declaring nothing.
    pub fn scan(content_dir: &Utf8Path, workshop_items: &[String]) -> Self {
        let mut graph = Self::new();

        for workshop_id in workshop_items {
            let mods_dir = content_dir.join(workshop_id).join("mods");
            let Ok(entries) = mods_dir.read_dir_utf8() else {
                tracing::debug!("No mods folder for workshop item {}", workshop_id);
                continue;
            };

            let mut folders: Vec<_> = entries
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_dir())
                .map(|entry| entry.file_name().to_string())
                .collect();
            folders.sort();

            for folder in folders {
                let info_path = mods_dir.join(&folder).join("mod.info");
                if !info_path.exists() {
                    continue;
                }
                let info = match fs::read(&info_path) {
                    Ok(bytes) => {
                        parse_mod_info(&String::from_utf8_lossy(&bytes), &folder, workshop_id)
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read {}: {}", info_path, e);
                        parse_mod_info("", &folder, workshop_id)
                    }
                };
                graph.insert(info);
            }
        }

        tracing::debug!(
            "Scanned {} mods from {} workshop items",
            graph.len(),
            workshop_items.len()
        );
        graph
    }

    pub fn insert(&mut self, info: ModInfo) {
        self.mods.insert(info.id.clone(), info);
    }

    pub fn get(&self, id: &str) -> Option<&ModInfo> {
        self.mods.get(id)
    }

    /// Declared requirements of `id` (empty if the mod is unknown)
    pub fn requires(&self, id: &str) -> &[String] {
        self.mods
            .get(id)
            .map(|info| info.requires.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }

    /// Active mods with no `mod.info` in the scanned content.
    pub fn missing<'a>(&self, active: &'a [String]) -> Vec<&'a str> {
        active
            .iter()
            .filter(|id| self.get(id).is_none())
            .map(String::as_str)
            .collect()
    }

    /// Order the `active` mods so every mod follows the active mods it requires.
    ///
    /// Depth-first over requirements, emitting a mod once all its active
    /// requirements are emitted. Inactive requirements impose no ordering.
    /// Mods without a relationship keep their relative order from `active`.
    ///
    /// Cycles are not reported: a requirement that is still being visited is
    /// treated as satisfied, so every active mod appears exactly once and the
    /// sort always terminates.
    pub fn sort(&self, active: &[String]) -> Vec<String> {
        let active_set: HashSet<&str> = active.iter().map(String::as_str).collect();
        let mut finished: HashSet<&str> = HashSet::new();
        let mut in_progress: HashSet<&str> = HashSet::new();
        let mut ordered = Vec::with_capacity(active_set.len());

        // (mod, index of the next requirement to visit)
        let mut stack: Vec<(&str, usize)> = Vec::new();

        for root in active {
            let root = root.as_str();
            if finished.contains(root) {
                continue;
            }
            in_progress.insert(root);
            stack.push((root, 0));

            while let Some((node, next)) = stack.last_mut() {
                let requires = self.requires(node);
                if *next < requires.len() {
                    let req = requires[*next].as_str();
                    *next += 1;
                    if active_set.contains(req)
                        && !finished.contains(req)
                        && !in_progress.contains(req)
                    {
                        in_progress.insert(req);
                        stack.push((req, 0));
                    }
                } else {
                    let node = *node;
                    stack.pop();
                    in_progress.remove(node);
                    finished.insert(node);
                    ordered.push(node.to_string());
                }
            }
        }

        ordered
    }
}

/// A mod whose position differs between two load orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOrderChange {
    /// 1-based position in the new order
    pub position: usize,
    pub mod_id: String,
    /// 1-based position in the old order, if it was present
    pub previous: Option<usize>,
}

impl fmt::Display for LoadOrderChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.previous {
            Some(previous) => write!(f, "[{}] {} (was {})", self.position, self.mod_id, previous),
            None => write!(f, "[{}] {} (new)", self.position, self.mod_id),
        }
    }
}

/// Positions of `new` that hold a different mod than the same position of `old`.
pub fn diff_load_order(old: &[String], new: &[String]) -> Vec<LoadOrderChange> {
    new.iter()
        .enumerate()
        .filter(|(index, mod_id)| old.get(*index) != Some(*mod_id))
        .map(|(index, mod_id)| LoadOrderChange {
            position: index + 1,
            mod_id: mod_id.clone(),
            previous: old.iter().position(|m| m == mod_id).map(|p| p + 1),
        })
        .collect()
}
