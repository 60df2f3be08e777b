use anyhow::{Context, Result};
use camino::Utf8Path;
use std::fs;

/// Mod selection read from the dedicated server's `<server>.ini`.
///
/// `WorkshopItems=` lists the workshop containers to download; `Mods=` lists
/// the active mod identifiers in load order. Both are `;`-separated and empty
/// entries are dropped. The file is only read here; editing it belongs to the
/// mod-management tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerIni {
    pub workshop_items: Vec<String>,
    pub mods: Vec<String>,
}

impl ServerIni {
    pub fn load(path: &Utf8Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read server ini: {}", path))?;
        Ok(Self::parse(&contents))
    }

    pub fn parse(contents: &str) -> Self {
        let mut ini = Self::default();
        for line in contents.lines() {
            let line = line.trim();
            if let Some(value) = line.strip_prefix("WorkshopItems=") {
                ini.workshop_items = split_list(value);
            } else if let Some(value) = line.strip_prefix("Mods=") {
                ini.mods = split_list(value);
            }
        }
        ini
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .trim()
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}
