//! Performance benchmarks for debrid-dav
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - Link cache throughput
//! - Entry store indexing and lookup
//! - Listing snapshot rebuilds
//! - PROPFIND body rendering and compression

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use chrono::Utc;
use debrid_dav::cache::{DirEntry, EntryStore, LinkCache, ListingCache, SnapshotStore, SnapshotWriter};
use debrid_dav::dav::xml;
use debrid_dav::types::{CachedTorrent, FolderNaming, Torrent, TorrentFile};

/// Create a Tokio runtime for async benchmarks
fn create_runtime() -> Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn restricted(i: usize) -> String {
    format!("https://debrid.example/d/{}", i)
}

fn sample_torrent(i: usize) -> Torrent {
    let name = format!("Torrent {}", i);
    let mut files = HashMap::new();
    files.insert(
        "video.mkv".to_string(),
        TorrentFile {
            id: "1".to_string(),
            name: "video.mkv".to_string(),
            path: "/video.mkv".to_string(),
            size: 1_400_000_000,
            link: Some(restricted(i)),
            download_link: None,
            link_generated_at: None,
        },
    );
    Torrent {
        id: format!("t{}", i),
        info_hash: format!("{:0>40}", i),
        name: name.clone(),
        filename: name,
        size: 1_400_000_000,
        status: "downloaded".to_string(),
        progress: 100.0,
        files,
        ..Torrent::default()
    }
}

fn new_store(root: &Path) -> EntryStore {
    let snapshots = SnapshotStore::open(root, "bench").unwrap();
    let writer = SnapshotWriter::spawn(snapshots);
    let listing = Arc::new(ListingCache::new("bench"));
    EntryStore::new(FolderNaming::OriginalName, writer, listing)
}

/// Benchmark link cache operations with varying entry counts
fn bench_link_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_cache");

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("insert", size), size, |b, &size| {
            let rt = create_runtime();
            b.iter(|| {
                rt.block_on(async {
                    let cache = LinkCache::new(size as u64 * 2, Duration::from_secs(60));
                    for i in 0..size {
                        cache
                            .insert(restricted(i), format!("https://cdn.example/{}", i), None)
                            .await;
                    }
                    black_box(cache);
                });
            });
        });

        group.bench_with_input(BenchmarkId::new("read_hit", size), size, |b, &size| {
            let rt = create_runtime();
            let cache = LinkCache::new(size as u64 * 2, Duration::from_secs(60));
            rt.block_on(async {
                for i in 0..size {
                    cache
                        .insert(restricted(i), format!("https://cdn.example/{}", i), None)
                        .await;
                }
            });

            b.iter(|| {
                rt.block_on(async {
                    for i in 0..size {
                        let _ = cache.get(&restricted(i)).await;
                    }
                });
            });
        });

        group.bench_with_input(BenchmarkId::new("read_mixed", size), size, |b, &size| {
            let rt = create_runtime();
            let cache = LinkCache::new(size as u64 * 2, Duration::from_secs(60));
            rt.block_on(async {
                for i in 0..size / 2 {
                    cache
                        .insert(restricted(i), format!("https://cdn.example/{}", i), None)
                        .await;
                }
            });

            b.iter(|| {
                rt.block_on(async {
                    for i in 0..size {
                        let _ = cache.get(&restricted(i)).await;
                    }
                });
            });
        });
    }

    group.finish();
}

/// Benchmark entry store indexing and lookups
fn bench_entry_store(c: &mut Criterion) {
    let mut group = c.benchmark_group("entry_store");
    group.throughput(Throughput::Elements(1000));

    group.bench_function("upsert_1000", |b| {
        let rt = create_runtime();
        let dir = tempfile::tempdir().unwrap();
        b.iter(|| {
            rt.block_on(async {
                let store = new_store(dir.path());
                for i in 0..1000 {
                    store.upsert(CachedTorrent::new(sample_torrent(i)));
                }
                black_box(&store);
            });
        });
    });

    group.bench_function("get_by_name_1000", |b| {
        let rt = create_runtime();
        let dir = tempfile::tempdir().unwrap();
        let store = rt.block_on(async {
            let store = new_store(dir.path());
            for i in 0..1000 {
                store.upsert(CachedTorrent::new(sample_torrent(i)));
            }
            store
        });

        b.iter(|| {
            for i in 0..1000 {
                let _ = black_box(store.get_by_name(&format!("Torrent {}", i)));
            }
        });
    });

    group.finish();
}

/// Benchmark listing snapshot rebuilds with varying torrent counts
fn bench_listing_rebuild(c: &mut Criterion) {
    let mut group = c.benchmark_group("listing_rebuild");

    for size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("rebuild", size), size, |b, &size| {
            let entries: Vec<CachedTorrent> = (0..size)
                .map(|i| CachedTorrent::new(sample_torrent(i)))
                .collect();
            let listing = ListingCache::new("bench");

            b.iter(|| {
                listing.rebuild(&entries, FolderNaming::OriginalName);
                black_box(listing.snapshot());
            });
        });
    }

    group.finish();
}

/// Benchmark PROPFIND body rendering and gzip compression
fn bench_propfind_render(c: &mut Criterion) {
    let mut group = c.benchmark_group("propfind_render");
    group.throughput(Throughput::Elements(1000));

    let now = Utc::now();
    let this = DirEntry::dir("torrents".to_string(), now);
    let children: Vec<DirEntry> = (0..1000)
        .map(|i| DirEntry::dir(format!("Torrent {}", i), now))
        .collect();

    group.bench_function("render_1000", |b| {
        b.iter(|| {
            let body = xml::render_multistatus("/debrid/torrents/", &this, Some(&children));
            black_box(body);
        });
    });

    group.bench_function("render_gzip_1000", |b| {
        let body = xml::render_multistatus("/debrid/torrents/", &this, Some(&children));
        b.iter(|| {
            let compressed = xml::gzip(body.as_bytes()).unwrap();
            black_box(compressed);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_link_cache,
    bench_entry_store,
    bench_listing_rebuild,
    bench_propfind_render
);
criterion_main!(benches);
