//! Content cache behavior against real files

use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_cache::{CacheError, ContentCache};
use strata_common::PathPattern;
use tempfile::TempDir;

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn store_then_lookup_round_trips() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "app.py", "def main():\n    return 1\n");
    let cache = ContentCache::default();

    cache
        .store(&file, "modify", "app.py::main", json!({"text": "patched"}))
        .await
        .unwrap();
    let hit = cache
        .lookup(&file, "modify", "app.py::main")
        .await
        .unwrap()
        .expect("hit");

    assert_eq!(hit.payload, json!({"text": "patched"}));
}

#[tokio::test]
async fn changed_content_misses_and_restored_content_hits() {
    let dir = TempDir::new().unwrap();
    let original = "def main():\n    return 1\n";
    let file = write(dir.path(), "app.py", original);
    let cache = ContentCache::default();
    cache.store(&file, "modify", "main", json!(1)).await.unwrap();

    std::fs::write(&file, "def main():\n    return 2\n").unwrap();
    assert!(cache.lookup(&file, "modify", "main").await.unwrap().is_none());

    std::fs::write(&file, original).unwrap();
    assert!(cache.lookup(&file, "modify", "main").await.unwrap().is_some());
}

#[tokio::test]
async fn scope_and_target_partition_entries() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "app.py", "x = 1\n");
    let cache = ContentCache::default();
    cache.store(&file, "modify", "a", json!("a")).await.unwrap();

    assert!(cache.lookup(&file, "refactor", "a").await.unwrap().is_none());
    assert!(cache.lookup(&file, "modify", "b").await.unwrap().is_none());
}

#[tokio::test]
async fn missing_file_reports_not_found() {
    let dir = TempDir::new().unwrap();
    let cache = ContentCache::default();
    let err = cache
        .store(dir.path().join("gone.py"), "s", "t", json!(null))
        .await
        .unwrap_err();
    assert!(matches!(err, CacheError::NotFound { .. }));
}

#[tokio::test]
async fn invalidate_file_removes_only_that_file() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.py", "a = 1\n");
    let b = write(dir.path(), "b.py", "b = 1\n");
    let cache = ContentCache::default();
    cache.store(&a, "s", "1", json!(1)).await.unwrap();
    cache.store(&a, "s", "2", json!(2)).await.unwrap();
    cache.store(&b, "s", "1", json!(3)).await.unwrap();

    assert_eq!(cache.invalidate_file(&a).await, 2);
    assert!(cache.lookup(&a, "s", "1").await.unwrap().is_none());
    assert!(cache.lookup(&b, "s", "1").await.unwrap().is_some());
}

#[tokio::test]
async fn invalidate_pattern_matches_globs() {
    let dir = TempDir::new().unwrap();
    let keep = write(dir.path(), "src/app.py", "a = 1\n");
    let drop_a = write(dir.path(), "tests/test_a.py", "b = 1\n");
    let drop_b = write(dir.path(), "tests/test_b.py", "c = 1\n");
    let cache = ContentCache::default();
    for file in [&keep, &drop_a, &drop_b] {
        cache.store(file, "s", "t", json!(true)).await.unwrap();
    }

    let pattern = PathPattern::new(["**/tests/*.py"]).unwrap();
    assert_eq!(cache.invalidate_pattern(&pattern).await, 2);
    assert_eq!(cache.len().await, 1);
    assert!(cache.lookup(&keep, "s", "t").await.unwrap().is_some());
}

#[tokio::test]
async fn clear_and_prune_report_counts() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "a.py", "a = 1\n");
    let cache = ContentCache::default();
    cache.store(&file, "s", "1", json!(1)).await.unwrap();
    cache.store(&file, "s", "2", json!(2)).await.unwrap();

    assert_eq!(cache.prune_older_than(Duration::from_secs(3600)).await, 0);
    assert_eq!(cache.prune_older_than(Duration::ZERO).await, 2);
    assert!(cache.is_empty().await);

    cache.store(&file, "s", "3", json!(3)).await.unwrap();
    assert_eq!(cache.clear_all().await, 1);
    assert_eq!(cache.clear_all().await, 0);
}

#[tokio::test]
async fn statistics_track_entries_and_hot_file() {
    let dir = TempDir::new().unwrap();
    let a = write(dir.path(), "a.py", "a = 1\n");
    let b = write(dir.path(), "b.py", "b = 1\n");
    let cache = ContentCache::default();
    cache.store(&a, "s", "t", json!("a")).await.unwrap();
    cache.store(&b, "s", "t", json!("b")).await.unwrap();
    for _ in 0..3 {
        cache.lookup(&b, "s", "t").await.unwrap();
    }

    let stats = cache.statistics().await;
    assert_eq!(stats.total_entries, 2);
    assert_eq!(stats.hits, 3);
    assert!(stats.approximate_bytes > 0);
    assert!(stats.oldest_entry <= stats.newest_entry);
    assert_eq!(
        stats.most_accessed_file.as_deref(),
        Some(strata_common::pattern::normalize(&b).as_str())
    );
}

#[tokio::test]
async fn snapshot_survives_restart() {
    let dir = TempDir::new().unwrap();
    let file = write(dir.path(), "a.py", "a = 1\n");
    let snapshot = dir.path().join("state/cache.json");

    let first = ContentCache::default();
    first.store(&file, "s", "t", json!({"n": 7})).await.unwrap();
    assert_eq!(first.save_snapshot(&snapshot).await.unwrap(), 1);

    let second = ContentCache::default();
    assert_eq!(second.load_snapshot(&snapshot).await.unwrap(), 1);
    let hit = second.lookup(&file, "s", "t").await.unwrap().unwrap();
    assert_eq!(hit.payload, json!({"n": 7}));
}

#[tokio::test]
async fn missing_snapshot_loads_nothing() {
    let dir = TempDir::new().unwrap();
    let cache = ContentCache::default();
    assert_eq!(cache.load_snapshot(dir.path().join("none.json")).await.unwrap(), 0);
}
