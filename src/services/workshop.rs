//! Steam Workshop metadata: remote lookup, persistent TTL cache and
//! recursive dependency resolution.
//!
//! The cache is the single entry point for metadata. It answers from disk
//! when an entry is younger than [`CACHE_TTL_SECS`] and fetches everything
//! else from the Web API in batches of [`BATCH_SIZE`]. The update checker
//! and the mod-management commands share one cache file.

use crate::models::WorkshopItem;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::{IndexMap, IndexSet};
use serde::Deserialize;
use std::fs;
use std::time::Duration;
use thiserror::Error;

/// GetPublishedFileDetails endpoint of the Steam Web API
pub const STEAM_DETAILS_URL: &str =
    "https://api.steampowered.com/ISteamRemoteStorage/GetPublishedFileDetails/v1/";

/// Maximum identifiers per remote request
pub const BATCH_SIZE: usize = 50;

/// Cache entries younger than this are served without a remote call
pub const CACHE_TTL_SECS: i64 = 24 * 60 * 60;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Metadata keyed by workshop identifier
pub type WorkshopDetails = IndexMap<String, WorkshopItem>;

/// Errors from the remote metadata source
#[derive(Error, Debug)]
pub enum WorkshopError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Steam API returned status {0}")]
    Status(u16),

    #[error("Invalid Steam API response: {0}")]
    InvalidResponse(#[from] serde_json::Error),
}

/// Remote source of workshop metadata.
#[allow(async_fn_in_trait)]
pub trait WorkshopApi {
    /// Fetch details for up to [`BATCH_SIZE`] identifiers.
    ///
    /// Identifiers unknown to the catalog are omitted from the result.
    async fn fetch_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, WorkshopItem)>, WorkshopError>;
}

#[derive(Debug, Deserialize)]
struct DetailsEnvelope {
    #[serde(default)]
    response: DetailsResponse,
}

#[derive(Debug, Default, Deserialize)]
struct DetailsResponse {
    #[serde(default)]
    publishedfiledetails: Vec<PublishedFile>,
}

#[derive(Debug, Deserialize)]
struct PublishedFile {
    publishedfileid: String,
    #[serde(default)]
    result: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    time_updated: i64,
    #[serde(default)]
    children: Vec<ChildFile>,
}

#[derive(Debug, Deserialize)]
struct ChildFile {
    publishedfileid: String,
}

/// Parse a GetPublishedFileDetails response body.
///
/// Only entries with `result == 1` (found) are returned. Children become the
/// item's dependency list.
pub fn parse_details_response(body: &str) -> Result<Vec<(String, WorkshopItem)>, WorkshopError> {
    let envelope: DetailsEnvelope = serde_json::from_str(body)?;
    Ok(items_from_envelope(envelope))
}

fn items_from_envelope(envelope: DetailsEnvelope) -> Vec<(String, WorkshopItem)> {
    envelope
        .response
        .publishedfiledetails
        .into_iter()
        .filter(|file| file.result == 1)
        .map(|file| {
            let dependencies = file
                .children
                .into_iter()
                .map(|child| child.publishedfileid)
                .collect();
            let item = WorkshopItem::new(
                file.title.unwrap_or_else(|| "Unknown".to_string()),
                file.time_updated,
                dependencies,
            );
            (file.publishedfileid, item)
        })
        .collect()
}

/// Steam Web API client for workshop metadata
pub struct SteamWorkshopApi {
    client: reqwest::Client,
    url: String,
}

impl SteamWorkshopApi {
    pub fn new() -> Result<Self, WorkshopError> {
        Self::with_url(STEAM_DETAILS_URL)
    }

    /// Client against a different endpoint (mirrors, local test servers)
    pub fn with_url(url: impl Into<String>) -> Result<Self, WorkshopError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl WorkshopApi for SteamWorkshopApi {
    async fn fetch_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, WorkshopItem)>, WorkshopError> {
        let mut form: Vec<(String, String)> = Vec::with_capacity(ids.len() + 1);
        form.push(("itemcount".to_string(), ids.len().to_string()));
        for (index, id) in ids.iter().enumerate() {
            form.push((format!("publishedfileids[{}]", index), id.clone()));
        }

        tracing::debug!("Requesting details for {} workshop items", ids.len());
        let response = self.client.post(&self.url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(WorkshopError::Status(status.as_u16()));
        }

        let envelope: DetailsEnvelope = response.json().await?;
        Ok(items_from_envelope(envelope))
    }
}

/// Persistent workshop metadata cache with a 24 hour freshness window.
pub struct MetadataCache<A> {
    api: A,
    path: Utf8PathBuf,
    entries: WorkshopDetails,
}

impl<A: WorkshopApi> MetadataCache<A> {
    /// Open the cache stored at `path`.
    ///
    /// A missing or unreadable cache file starts an empty cache.
    pub fn open(api: A, path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        let entries = match load_entries(&path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Ignoring unreadable workshop cache {}: {:#}", path, e);
                WorkshopDetails::new()
            }
        };
        Self { api, path, entries }
    }

    /// Cached title, or `Unknown (<id>)`.
    pub fn title(&self, id: &str) -> String {
        self.entries
            .get(id)
            .map(|item| item.title.clone())
            .unwrap_or_else(|| format!("Unknown ({})", id))
    }

    /// Metadata for `ids`, from cache when fresh and from the API otherwise.
    pub async fn get_details(&mut self, ids: &[String], force_refresh: bool) -> WorkshopDetails {
        let now = chrono::Utc::now().timestamp();
        self.get_details_at(ids, force_refresh, now).await
    }

    /// [`get_details`](Self::get_details) evaluated at an explicit Unix time.
    ///
    /// Fresh entries are returned as-is. Stale and missing identifiers are
    /// fetched in batches; each fetched entry is stamped with `now`, merged
    /// into the cache, and the whole cache is rewritten once if anything was
    /// fetched. Identifiers the catalog doesn't know are absent from the
    /// result.
    pub async fn get_details_at(
        &mut self,
        ids: &[String],
        force_refresh: bool,
        now: i64,
    ) -> WorkshopDetails {
        let mut results = WorkshopDetails::new();
        let mut missing: IndexSet<String> = IndexSet::new();

        for id in ids {
            match self.entries.get(id) {
                Some(entry) if !force_refresh && now - entry.fetched_at < CACHE_TTL_SECS => {
                    results.insert(id.clone(), entry.clone());
                }
                _ => {
                    missing.insert(id.clone());
                }
            }
        }

        if missing.is_empty() {
            return results;
        }

        let missing: Vec<String> = missing.into_iter().collect();
        let mut fetched = 0usize;

        for batch in missing.chunks(BATCH_SIZE) {
            match self.api.fetch_details(batch).await {
                Ok(items) => {
                    for (id, mut item) in items {
                        item.fetched_at = now;
                        self.entries.insert(id.clone(), item.clone());
                        results.insert(id, item);
                        fetched += 1;
                    }
                }
                Err(e) => {
                    tracing::warn!("Steam API error for batch of {}: {}", batch.len(), e);
                }
            }
        }

        tracing::debug!(
            "Workshop details: {} requested, {} fetched remotely",
            ids.len(),
            fetched
        );

        if fetched > 0 {
            if let Err(e) = self.save() {
                tracing::warn!("Failed to persist workshop cache: {:#}", e);
            }
        }

        results
    }

    /// All workshop items required by `seeds`, transitively, seeds included.
    ///
    /// Expands a frontier of newly discovered identifiers until no new ones
    /// appear. An identifier without metadata is a leaf. The result keeps
    /// discovery order.
    pub async fn resolve_dependencies(&mut self, seeds: &[String]) -> IndexSet<String> {
        let mut resolved: IndexSet<String> = seeds.iter().cloned().collect();
        let mut frontier: Vec<String> = resolved.iter().cloned().collect();

        while !frontier.is_empty() {
            let details = self.get_details(&frontier, false).await;
            let mut next = Vec::new();

            for id in &frontier {
                let Some(item) = details.get(id) else {
                    continue;
                };
                for dep in &item.dependencies {
                    if resolved.insert(dep.clone()) {
                        next.push(dep.clone());
                    }
                }
            }

            frontier = next;
        }

        tracing::info!(
            "Resolved {} workshop items from {} seeds",
            resolved.len(),
            seeds.len()
        );
        resolved
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent))?;
        }
        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize workshop cache")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write workshop cache: {}", self.path))?;
        Ok(())
    }
}

fn load_entries(path: &Utf8Path) -> Result<WorkshopDetails> {
    if !path.exists() {
        return Ok(WorkshopDetails::new());
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read workshop cache: {}", path))?;
    let entries = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse workshop cache: {}", path))?;
    Ok(entries)
}

/// Append resolved identifiers missing from `workshop_items`.
///
/// # Returns
/// How many identifiers were added
pub fn merge_resolved<I>(workshop_items: &mut Vec<String>, resolved: I) -> usize
where
    I: IntoIterator<Item = String>,
{
    let mut added = 0;
    for id in resolved {
        if !workshop_items.contains(&id) {
            workshop_items.push(id);
            added += 1;
        }
    }
    added
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RESPONSE: &str = r#"{
        "response": {
            "result": 1,
            "resultcount": 3,
            "publishedfiledetails": [
                {
                    "publishedfileid": "2392709985",
                    "result": 1,
                    "title": "Tsar's Common Library",
                    "time_updated": 1700000000,
                    "children": [
                        { "publishedfileid": "2169435993", "sortorder": 1, "file_type": 0 }
                    ]
                },
                {
                    "publishedfileid": "2169435993",
                    "result": 1,
                    "title": "ModOptions",
                    "time_updated": 1600000000
                },
                {
                    "publishedfileid": "1",
                    "result": 9
                }
            ]
        }
    }"#;

    #[test]
    fn test_parse_details_response() {
        let items = parse_details_response(SAMPLE_RESPONSE).unwrap();
        assert_eq!(items.len(), 2);

        let (id, item) = &items[0];
        assert_eq!(id, "2392709985");
        assert_eq!(item.title, "Tsar's Common Library");
        assert_eq!(item.time_updated, 1_700_000_000);
        assert_eq!(item.dependencies, vec!["2169435993".to_string()]);

        let (_, leaf) = &items[1];
        assert!(leaf.dependencies.is_empty());
    }

    #[test]
    fn test_parse_details_missing_response() {
        let items = parse_details_response("{}").unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_parse_details_invalid_json() {
        assert!(matches!(
            parse_details_response("<html>"),
            Err(WorkshopError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_merge_resolved() {
        let mut items = vec!["1".to_string(), "2".to_string()];
        let added = merge_resolved(
            &mut items,
            vec!["2".to_string(), "3".to_string(), "4".to_string()],
        );
        assert_eq!(added, 2);
        assert_eq!(items, vec!["1", "2", "3", "4"]);
    }
}
