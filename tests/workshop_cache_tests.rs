//! Integration tests for the workshop metadata cache, the dependency resolver
//! and the update checker
//!
//! A fake catalog stands in for the Steam Web API and records every batch it
//! is asked for, so the tests can assert exactly when remote calls happen.

use camino::Utf8PathBuf;
use pzkeeper::models::{InstanceConfig, WorkshopItem};
use pzkeeper::services::workshop::{BATCH_SIZE, CACHE_TTL_SECS};
use pzkeeper::services::{MetadataCache, UpdateChecker, WorkshopApi, WorkshopError, merge_resolved};
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

const T0: i64 = 1_700_000_000;

#[derive(Clone, Default)]
struct FakeCatalog {
    items: Arc<HashMap<String, WorkshopItem>>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    failing: bool,
}

impl FakeCatalog {
    fn with_items(items: &[(&str, i64, &[&str])]) -> Self {
        let items = items
            .iter()
            .map(|(id, updated, deps)| {
                let deps = deps.iter().map(|d| d.to_string()).collect();
                (id.to_string(), WorkshopItem::new(format!("Mod {}", id), *updated, deps))
            })
            .collect();
        Self {
            items: Arc::new(items),
            ..Self::default()
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

impl WorkshopApi for FakeCatalog {
    async fn fetch_details(
        &self,
        ids: &[String],
    ) -> Result<Vec<(String, WorkshopItem)>, WorkshopError> {
        self.calls.lock().unwrap().push(ids.to_vec());
        if self.failing {
            return Err(WorkshopError::Status(503));
        }
        Ok(ids
            .iter()
            .filter_map(|id| self.items.get(id).map(|item| (id.clone(), item.clone())))
            .collect())
    }
}

fn cache_path(temp: &TempDir) -> Utf8PathBuf {
    Utf8PathBuf::try_from(temp.path().join("workshop_cache.json")).unwrap()
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_entry_fresh_for_24_hours() {
    let temp = TempDir::new().unwrap();
    let api = FakeCatalog::with_items(&[("100", 5, &[])]);
    let mut cache = MetadataCache::open(api.clone(), cache_path(&temp));

    let first = cache.get_details_at(&ids(&["100"]), false, T0).await;
    assert_eq!(first["100"].fetched_at, T0);
    assert_eq!(api.calls().len(), 1);

    let almost = T0 + CACHE_TTL_SECS - 60;
    let second = cache.get_details_at(&ids(&["100"]), false, almost).await;
    assert_eq!(second["100"].fetched_at, T0);
    assert_eq!(api.calls().len(), 1);

    let expired = T0 + CACHE_TTL_SECS + 60;
    let third = cache.get_details_at(&ids(&["100"]), false, expired).await;
    assert_eq!(third["100"].fetched_at, expired);
    assert_eq!(api.calls().len(), 2);
}

#[tokio::test]
async fn test_force_refresh_bypasses_freshness() {
    let temp = TempDir::new().unwrap();
    let api = FakeCatalog::with_items(&[("100", 5, &[])]);
    let mut cache = MetadataCache::open(api.clone(), cache_path(&temp));

    cache.get_details_at(&ids(&["100"]), false, T0).await;
    let forced = cache.get_details_at(&ids(&["100"]), true, T0 + 10).await;

    assert_eq!(api.calls().len(), 2);
    assert_eq!(forced["100"].fetched_at, T0 + 10);
}

#[tokio::test]
async fn test_only_stale_ids_are_fetched_in_batches() {
    let temp = TempDir::new().unwrap();
    let all: Vec<String> = (0..120).map(|i| format!("{}", 1000 + i)).collect();
    let entries: Vec<(&str, i64, &[&str])> =
        all.iter().map(|id| (id.as_str(), 1, &[][..])).collect();
    let api = FakeCatalog::with_items(&entries);
    let mut cache = MetadataCache::open(api.clone(), cache_path(&temp));

    // Warm two entries, then ask for everything.
    cache.get_details_at(&all[..2], false, T0).await;
    let details = cache.get_details_at(&all, false, T0 + 1).await;

    let calls = api.calls();
    let sizes: Vec<usize> = calls[1..].iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![BATCH_SIZE, BATCH_SIZE, 18]);
    assert!(calls[1..].iter().flatten().all(|id| id != &all[0] && id != &all[1]));
    assert_eq!(details.len(), 120);
}

#[tokio::test]
async fn test_unknown_ids_absent_from_result() {
    let temp = TempDir::new().unwrap();
    let api = FakeCatalog::with_items(&[("1", 1, &[])]);
    let mut cache = MetadataCache::open(api, cache_path(&temp));

    let details = cache.get_details_at(&ids(&["1", "404"]), false, T0).await;
    assert_eq!(details.keys().collect::<Vec<_>>(), vec!["1"]);
    assert_eq!(cache.title("404"), "Unknown (404)");
    assert_eq!(cache.title("1"), "Mod 1");
}

#[tokio::test]
async fn test_cache_persisted_and_reloaded() {
    let temp = TempDir::new().unwrap();
    let path = cache_path(&temp);
    let api = FakeCatalog::with_items(&[("7", 42, &["8"])]);

    {
        let mut cache = MetadataCache::open(api.clone(), path.clone());
        cache.get_details_at(&ids(&["7"]), false, T0).await;
    }

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["7"]["title"], "Mod 7");
    assert_eq!(json["7"]["time_updated"], 42);
    assert_eq!(json["7"]["dependencies"][0], "8");
    assert_eq!(json["7"]["fetched_at"], T0);

    let offline = FakeCatalog {
        failing: true,
        ..FakeCatalog::default()
    };
    let mut reopened = MetadataCache::open(offline.clone(), path);
    let details = reopened.get_details_at(&ids(&["7"]), false, T0 + 60).await;
    assert_eq!(details["7"].time_updated, 42);
    assert!(offline.calls().is_empty());
}

#[tokio::test]
async fn test_failed_fetch_leaves_cache_untouched() {
    let temp = TempDir::new().unwrap();
    let path = cache_path(&temp);
    let api = FakeCatalog {
        failing: true,
        ..FakeCatalog::default()
    };
    let mut cache = MetadataCache::open(api, path.clone());

    assert!(cache.get_details_at(&ids(&["1"]), false, T0).await.is_empty());
    assert!(!path.exists());
}

#[tokio::test]
async fn test_corrupt_cache_file_starts_empty() {
    let temp = TempDir::new().unwrap();
    let path = cache_path(&temp);
    fs::write(&path, "{ not json").unwrap();

    let api = FakeCatalog::with_items(&[("5", 9, &[])]);
    let mut cache = MetadataCache::open(api.clone(), path.clone());
    assert_eq!(cache.title("5"), "Unknown (5)");

    let details = cache.get_details_at(&ids(&["5"]), false, T0).await;
    assert_eq!(details["5"].time_updated, 9);
    assert_eq!(api.calls().len(), 1);

    let json: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json.as_object().unwrap().len(), 1);
}

#[tokio::test]
async fn test_resolve_dependencies_closure_with_cycle_and_missing_leaf() {
    let temp = TempDir::new().unwrap();
    // A requires B and C, B requires D (unknown to the catalog), C requires A.
    let api = FakeCatalog::with_items(&[("A", 1, &["B", "C"]), ("B", 1, &["D"]), ("C", 1, &["A"])]);
    let mut cache = MetadataCache::open(api.clone(), cache_path(&temp));

    let closure = cache.resolve_dependencies(&ids(&["A"])).await;
    let closure: Vec<&str> = closure.iter().map(String::as_str).collect();
    assert_eq!(closure, vec!["A", "B", "C", "D"]);

    // One request per frontier: [A], [B, C], [D].
    assert_eq!(api.calls(), vec![ids(&["A"]), ids(&["B", "C"]), ids(&["D"])]);
}

#[tokio::test]
async fn test_merge_resolved_into_workshop_list() {
    let temp = TempDir::new().unwrap();
    let api = FakeCatalog::with_items(&[("10", 1, &["20", "30"]), ("20", 1, &[]), ("30", 1, &[])]);
    let mut cache = MetadataCache::open(api, cache_path(&temp));

    let mut workshop_items = ids(&["30", "10"]);
    let resolved = cache.resolve_dependencies(&ids(&["10"])).await;
    let added = merge_resolved(&mut workshop_items, resolved);

    assert_eq!(added, 1);
    assert_eq!(workshop_items, ids(&["30", "10", "20"]));
}

fn install_fixture(temp: &TempDir, ini: &str, manifest: &str) -> InstanceConfig {
    let root = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    let mut config = InstanceConfig::for_instance("default");
    config.install_dir = root.join("install");

    let ini_path = config.server_ini_path();
    fs::create_dir_all(ini_path.parent().unwrap()).unwrap();
    fs::write(&ini_path, ini).unwrap();

    let manifest_path = config.workshop_manifest_path();
    fs::create_dir_all(manifest_path.parent().unwrap()).unwrap();
    fs::write(&manifest_path, manifest).unwrap();
    config
}

const MANIFEST: &str = "\"AppWorkshop\"\n{\n\t\"WorkshopItemsInstalled\"\n\t{\n\t\t\"111\"\n\t\t{\n\t\t\t\"timeupdated\"\t\t\"1000\"\n\t\t}\n\t\t\"222\"\n\t\t{\n\t\t\t\"timeupdated\"\t\t\"1000\"\n\t\t}\n\t}\n}\n";

#[tokio::test]
async fn test_update_checker_reports_newer_remote_items() {
    let temp = TempDir::new().unwrap();
    let config = install_fixture(&temp, "WorkshopItems=111;222\nMods=a;b\n", MANIFEST);
    let api = FakeCatalog::with_items(&[("111", 2000, &[]), ("222", 1000, &[])]);
    let mut checker = UpdateChecker::new(MetadataCache::open(api.clone(), cache_path(&temp)));

    assert_eq!(checker.check(&config).await.unwrap(), ids(&["111"]));
    assert_eq!(api.calls().len(), 1);

    // Every check refreshes, even within the freshness window.
    checker.check(&config).await.unwrap();
    assert_eq!(api.calls().len(), 2);
}

#[tokio::test]
async fn test_update_checker_assumes_no_update_without_data() {
    let temp = TempDir::new().unwrap();

    let config = install_fixture(&temp, "WorkshopItems=\n", MANIFEST);
    let api = FakeCatalog::with_items(&[("111", 2000, &[])]);
    let mut checker = UpdateChecker::new(MetadataCache::open(api.clone(), cache_path(&temp)));
    assert!(checker.check(&config).await.unwrap().is_empty());
    assert!(api.calls().is_empty());

    let config = install_fixture(&temp, "WorkshopItems=111\n", MANIFEST);
    let offline = FakeCatalog {
        failing: true,
        ..FakeCatalog::default()
    };
    let mut checker = UpdateChecker::new(MetadataCache::open(offline, cache_path(&temp)));
    assert!(checker.check(&config).await.unwrap().is_empty());
}
