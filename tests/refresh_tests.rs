//! Integration tests for the synchronization passes
//!
//! These tests verify the startup full sync, the incremental torrent
//! refresh, and the link refresh against a scripted provider.

use std::path::Path;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio::sync::broadcast;

use debrid_dav::cache::{spawn_refresh_workers, TorrentCache};

mod common;
use common::fake_client::FakeDebridClient;
use common::fixtures::{backend_config, cache_config, multi_file_torrent, single_file_torrent};

fn build_cache(client: Arc<FakeDebridClient>, root: &Path) -> Arc<TorrentCache> {
    let (cache, _rx) =
        TorrentCache::new(&backend_config("debrid"), &cache_config(root), client).unwrap();
    cache
}

/// A receiver nobody can signal; the sync runs to completion.
fn no_shutdown() -> broadcast::Receiver<()> {
    broadcast::channel(1).1
}

async fn wait_for(what: &str, mut cond: impl FnMut() -> bool) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test]
async fn test_full_sync_populates_store() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::with_catalog(vec![
        single_file_torrent("t1", "Alpha", "alpha.mkv", 100),
        multi_file_torrent("t2", "Beta", &[("b1.mkv", 10), ("b2.mkv", 20)]),
    ]));
    let cache = build_cache(client.clone(), dir.path());

    let outcome = cache.full_sync(no_shutdown()).await.unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.removed, 0);
    assert_eq!(outcome.failed, 0);
    assert!(!outcome.skipped);

    // The shallow listing records were deepened through the provider.
    let alpha = cache.store().get_by_name("Alpha").unwrap();
    assert!(alpha.is_complete);
    assert_eq!(alpha.torrent.files.len(), 1);
    let beta = cache.store().get_by_name("Beta").unwrap();
    assert_eq!(beta.torrent.files.len(), 2);
    assert_eq!(client.update_calls.load(SeqCst), 2);

    // The listing snapshot was rebuilt with both folders.
    let snapshot = cache.listing().snapshot();
    let names: Vec<&str> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Alpha", "Beta"]);
}

#[tokio::test]
async fn test_full_sync_drops_torrents_gone_from_remote() {
    let dir = TempDir::new().unwrap();

    // First run: the provider holds three torrents.
    let client = Arc::new(FakeDebridClient::with_catalog(vec![
        single_file_torrent("a", "Alpha", "a.mkv", 1),
        single_file_torrent("b", "Beta", "b.mkv", 2),
        single_file_torrent("c", "Gamma", "c.mkv", 3),
    ]));
    let cache = build_cache(client.clone(), dir.path());
    cache.full_sync(no_shutdown()).await.unwrap();
    assert_eq!(cache.store().len(), 3);
    wait_for("snapshots to flush", || {
        cache.snapshots().load_all().len() == 3
    })
    .await;

    // Restart against a provider that has lost Gamma.
    drop(cache);
    let client = Arc::new(FakeDebridClient::with_catalog(vec![
        single_file_torrent("a", "Alpha", "a.mkv", 1),
        single_file_torrent("b", "Beta", "b.mkv", 2),
    ]));
    let cache = build_cache(client.clone(), dir.path());
    let outcome = cache.full_sync(no_shutdown()).await.unwrap();

    // Replayed snapshots already cover the survivors, so nothing is
    // fetched; only the vanished torrent is work.
    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.added, 0);
    assert_eq!(client.update_calls.load(SeqCst), 0);

    let mut ids: Vec<String> = cache.store().ids().into_iter().collect();
    ids.sort();
    assert_eq!(ids, vec!["a", "b"]);
    // Replayed entries kept their files through the disk round trip.
    assert!(cache.store().get("a").unwrap().is_complete);
    assert!(cache.store().get_by_name("Gamma").is_none());

    // The vanished torrent's snapshot leaves the disk too.
    wait_for("stale snapshot removal", || {
        !cache.snapshots().path_for("c").exists()
    })
    .await;
}

#[tokio::test]
async fn test_full_sync_counts_failures_without_aborting() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::with_catalog(vec![
        single_file_torrent("a", "Alpha", "a.mkv", 1),
        single_file_torrent("b", "Beta", "b.mkv", 2),
        single_file_torrent("c", "Gamma", "c.mkv", 3),
    ]));
    client.fail_update_for("b");
    let cache = build_cache(client.clone(), dir.path());

    let outcome = cache.full_sync(no_shutdown()).await.unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.failed, 1);
    assert!(cache.store().contains("a"));
    assert!(!cache.store().contains("b"));
    assert!(cache.store().contains("c"));
}

#[tokio::test]
async fn test_concurrent_full_sync_runs_once() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::with_catalog(vec![single_file_torrent(
        "a", "Alpha", "a.mkv", 1,
    )]));
    *client.list_delay.lock().unwrap() = Some(Duration::from_millis(100));
    let cache = build_cache(client.clone(), dir.path());

    let (first, second) = tokio::join!(cache.full_sync(no_shutdown()), cache.full_sync(no_shutdown()));
    let outcomes = [first.unwrap(), second.unwrap()];

    assert_eq!(outcomes.iter().filter(|o| o.skipped).count(), 1);
    assert_eq!(outcomes.iter().filter(|o| !o.skipped).count(), 1);
    assert_eq!(client.list_calls.load(SeqCst), 1);
    assert_eq!(cache.store().len(), 1);
}

#[tokio::test]
async fn test_refresh_adds_new_and_drops_vanished() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::with_catalog(vec![single_file_torrent(
        "a", "Alpha", "a.mkv", 1,
    )]));
    let cache = build_cache(client.clone(), dir.path());
    cache.full_sync(no_shutdown()).await.unwrap();

    client.add_torrent(single_file_torrent("b", "Beta", "b.mkv", 2));
    client.remove_torrent("a");

    let outcome = cache.refresh_torrents().await.unwrap();
    assert_eq!(outcome.added, 1);
    assert_eq!(outcome.removed, 1);

    assert!(!cache.store().contains("a"));
    let beta = cache.store().get_by_name("Beta").unwrap();
    assert!(beta.is_complete);
}

#[tokio::test]
async fn test_refresh_links_warms_cache_and_skips_dead_entries() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::new());
    client.add_recent(
        "https://debrid.example/d/x/x.mkv",
        "https://cdn.example/x/x.mkv",
        Utc::now() + chrono::Duration::hours(1),
    );
    client.add_recent(
        "https://debrid.example/d/y/y.mkv",
        "https://cdn.example/y/y.mkv",
        Utc::now() - chrono::Duration::hours(1),
    );
    let cache = build_cache(client.clone(), dir.path());

    let loaded = cache.refresh_links().await.unwrap();
    assert_eq!(loaded, 1);

    let hit = cache
        .links()
        .get("https://debrid.example/d/x/x.mkv")
        .await
        .unwrap();
    assert_eq!(hit.url, "https://cdn.example/x/x.mkv");
    assert!(cache
        .links()
        .get("https://debrid.example/d/y/y.mkv")
        .await
        .is_none());

    // The counters behind the pass's summary line saw both lookups.
    let stats = cache.links().stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test]
async fn test_full_sync_stops_fetching_after_shutdown_signal() {
    let dir = TempDir::new().unwrap();
    let catalog = (0..8)
        .map(|i| single_file_torrent(&format!("t{}", i), &format!("Torrent {}", i), "f.mkv", 1))
        .collect();
    let client = Arc::new(FakeDebridClient::with_catalog(catalog));
    *client.update_delay.lock().unwrap() = Some(Duration::from_millis(500));
    let cache = build_cache(client.clone(), dir.path());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let sync = tokio::spawn({
        let cache = cache.clone();
        async move { cache.full_sync(shutdown_rx).await }
    });

    // Four workers go in flight on the first wave; pull the plug while
    // they are still mid-fetch.
    wait_for("the first wave of fetches", || {
        client.update_calls.load(SeqCst) == 4
    })
    .await;
    shutdown_tx.send(()).unwrap();

    let outcome = sync.await.unwrap().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.added, 4);

    // In-flight fetches landed; the rest of the queue was never popped.
    assert_eq!(cache.store().len(), 4);
    assert_eq!(client.update_calls.load(SeqCst), 4);
}

#[tokio::test]
async fn test_refresh_worker_applies_remote_changes() {
    let dir = TempDir::new().unwrap();
    let client = Arc::new(FakeDebridClient::new());
    let cache = build_cache(client.clone(), dir.path());
    cache.full_sync(no_shutdown()).await.unwrap();

    let (shutdown_tx, _) = broadcast::channel(1);
    let handles = spawn_refresh_workers(cache.clone(), &shutdown_tx);

    client.add_torrent(single_file_torrent("late", "Latecomer", "l.mkv", 9));
    wait_for("refresh worker to pick up the torrent", || {
        cache.store().contains("late")
    })
    .await;

    // The listing rebuild worker follows the store change.
    wait_for("listing snapshot to include the torrent", || {
        cache
            .listing()
            .snapshot()
            .entries
            .iter()
            .any(|e| e.name == "Latecomer")
    })
    .await;

    shutdown_tx.send(()).unwrap();
    for handle in handles {
        handle.await.unwrap();
    }
}
