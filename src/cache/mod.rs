//! Per-backend cache of remote torrent state.
//!
//! One [`TorrentCache`] owns everything the crate knows about a single
//! debrid account: the entry store with its disk snapshots, the
//! download-link cache, the pre-rendered listing snapshot, and the
//! repair queue. Background passes in [`refresh`] and the worker in
//! [`repair`] keep it converging on the provider's state.

pub mod links;
pub mod listing;
pub mod persist;
pub mod refresh;
pub mod repair;
pub mod store;

pub use links::{CachedLink, LinkCache, LinkStats};
pub use listing::{Depth, DirEntry, ListingCache, ListingSnapshot, PropfindPayload, SCOPES};
pub use persist::{SnapshotStore, SnapshotWriter};
pub use refresh::{spawn_refresh_workers, SyncOutcome};
pub use repair::{spawn_repair_worker, RepairOutcome, RepairQueue, RepairReceiver};
pub use store::EntryStore;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{BackendConfig, CacheConfig};
use crate::debrid::DebridClient;
use crate::error::DavResult;
use crate::types::{FolderNaming, Torrent, TorrentFile};

const LINK_CACHE_CAPACITY: u64 = 10_000;

/// Cached view of one debrid backend.
pub struct TorrentCache {
    name: String,
    naming: FolderNaming,
    client: Arc<dyn DebridClient>,
    store: EntryStore,
    links: LinkCache,
    listing: Arc<ListingCache>,
    snapshots: SnapshotStore,
    repair: RepairQueue,
    sync_workers: usize,
    refresh_interval: Duration,
    link_refresh_interval: Duration,
    full_sync_guard: Mutex<()>,
    refresh_guard: Mutex<()>,
    link_guard: Mutex<()>,
}

impl TorrentCache {
    /// Build the cache for one backend. The returned receiver feeds the
    /// repair worker; hand it to [`spawn_repair_worker`].
    pub fn new(
        backend: &BackendConfig,
        cache: &CacheConfig,
        client: Arc<dyn DebridClient>,
    ) -> DavResult<(Arc<Self>, RepairReceiver)> {
        let snapshots = SnapshotStore::open(&cache.root, &backend.name)?;
        let writer = SnapshotWriter::spawn(snapshots.clone());
        let listing = Arc::new(ListingCache::new(backend.name.clone()));
        let store = EntryStore::new(backend.folder_naming, writer, listing.clone());
        let links = LinkCache::new(LINK_CACHE_CAPACITY, cache.default_link_ttl());
        let (repair, receiver) = RepairQueue::new(repair::REPAIR_QUEUE_CAPACITY);

        let this = Arc::new(Self {
            name: backend.name.clone(),
            naming: backend.folder_naming,
            client,
            store,
            links,
            listing,
            snapshots,
            repair,
            sync_workers: cache.effective_sync_workers(),
            refresh_interval: cache.refresh_interval(),
            link_refresh_interval: cache.link_refresh_interval(),
            full_sync_guard: Mutex::new(()),
            refresh_guard: Mutex::new(()),
            link_guard: Mutex::new(()),
        });
        info!(backend = this.name, naming = %this.naming, "Torrent cache ready");
        Ok((this, receiver))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn naming(&self) -> FolderNaming {
        self.naming
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    pub fn links(&self) -> &LinkCache {
        &self.links
    }

    pub fn listing(&self) -> &ListingCache {
        &self.listing
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    pub fn client(&self) -> &Arc<dyn DebridClient> {
        &self.client
    }

    pub(crate) fn sync_workers(&self) -> usize {
        self.sync_workers
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    pub fn link_refresh_interval(&self) -> Duration {
        self.link_refresh_interval
    }

    pub(crate) fn full_sync_guard(&self) -> &Mutex<()> {
        &self.full_sync_guard
    }

    pub(crate) fn refresh_guard(&self) -> &Mutex<()> {
        &self.refresh_guard
    }

    pub(crate) fn link_guard(&self) -> &Mutex<()> {
        &self.link_guard
    }

    /// Hand a suspect torrent to the repair worker. Returns whether it
    /// was queued; duplicates and overflow are shed.
    pub fn submit_repair(&self, torrent_id: &str) -> bool {
        self.repair.submit(torrent_id)
    }

    /// Rebuild the listing snapshot from the store's current contents.
    /// Clears the dirty flag first so mutations landing mid-rebuild
    /// queue another pass instead of being lost.
    pub fn rebuild_listing(&self) {
        self.listing.take_dirty();
        self.listing.rebuild(&self.store.all(), self.naming);
    }

    /// Resolve a file's download URL through the link cache, recording it
    /// on the stored entry. A provider verdict that the link is gone for
    /// good queues the torrent for repair before surfacing the error.
    pub async fn resolve_file(
        &self,
        torrent: &Torrent,
        file: &TorrentFile,
    ) -> DavResult<CachedLink> {
        match self.links.resolve(self.client.as_ref(), torrent, file).await {
            Ok(link) => {
                self.store
                    .record_link(&torrent.id, &file.name, &link.url, Utc::now());
                Ok(link)
            }
            Err(e) => {
                if e.is_repair_candidate() {
                    warn!(
                        backend = self.name,
                        id = %torrent.id,
                        file = %file.name,
                        error = %e,
                        "Link resolution failed, queueing repair"
                    );
                    self.submit_repair(&torrent.id);
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debrid::{MockDebridClient, ResolvedLink};
    use crate::error::DavError;
    use crate::types::CachedTorrent;

    fn test_configs(dir: &std::path::Path) -> (BackendConfig, CacheConfig) {
        let backend = BackendConfig {
            name: "testdebrid".to_string(),
            url: "https://api.example.com".to_string(),
            token: "token".to_string(),
            folder_naming: FolderNaming::default(),
        };
        let cache = CacheConfig {
            root: dir.to_path_buf(),
            ..CacheConfig::default()
        };
        (backend, cache)
    }

    fn torrent_with_file(id: &str, file: &str) -> Torrent {
        let mut t = Torrent {
            id: id.to_string(),
            name: format!("{}-name", id),
            filename: format!("{}-name", id),
            ..Torrent::default()
        };
        t.files.insert(
            file.to_string(),
            TorrentFile {
                id: "1".to_string(),
                name: file.to_string(),
                path: format!("/{}", file),
                size: 1024,
                link: Some(format!("rd://{}/{}", id, file)),
                download_link: None,
                link_generated_at: None,
            },
        );
        t
    }

    #[tokio::test]
    async fn test_resolve_file_records_link_on_entry() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cache_cfg) = test_configs(dir.path());

        let mut client = MockDebridClient::new();
        client.expect_resolve_link().times(1).returning(|_, _| {
            Ok(ResolvedLink {
                url: "https://cdn/a.mkv".to_string(),
                expires_at: None,
            })
        });

        let (cache, _rx) =
            TorrentCache::new(&backend, &cache_cfg, Arc::new(client)).unwrap();
        let torrent = torrent_with_file("tor1", "a.mkv");
        cache.store().upsert(CachedTorrent::new(torrent.clone()));

        let file = torrent.file("a.mkv").unwrap();
        let link = cache.resolve_file(&torrent, file).await.unwrap();
        assert_eq!(link.url, "https://cdn/a.mkv");

        let stored = cache.store().get("tor1").unwrap();
        let stored_file = stored.torrent.file("a.mkv").unwrap();
        assert_eq!(stored_file.download_link.as_deref(), Some("https://cdn/a.mkv"));
        assert!(stored_file.link_generated_at.is_some());
    }

    #[tokio::test]
    async fn test_resolve_file_queues_repair_on_dead_link() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cache_cfg) = test_configs(dir.path());

        let mut client = MockDebridClient::new();
        client.expect_resolve_link().returning(|_, _| {
            Err(DavError::LinkUnreachable("rd://tor1/a.mkv".to_string()))
        });

        let (cache, mut rx) =
            TorrentCache::new(&backend, &cache_cfg, Arc::new(client)).unwrap();
        let torrent = torrent_with_file("tor1", "a.mkv");
        cache.store().upsert(CachedTorrent::new(torrent.clone()));

        let file = torrent.file("a.mkv").unwrap();
        let err = cache.resolve_file(&torrent, file).await.unwrap_err();
        assert!(matches!(err, DavError::LinkUnreachable(_)));

        let queued = rx.rx.try_recv().unwrap();
        assert_eq!(queued, "tor1");
    }

    #[tokio::test]
    async fn test_transient_resolve_failure_does_not_queue_repair() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cache_cfg) = test_configs(dir.path());

        let mut client = MockDebridClient::new();
        client
            .expect_resolve_link()
            .returning(|_, _| Err(DavError::TimedOut("resolve".to_string())));

        let (cache, mut rx) =
            TorrentCache::new(&backend, &cache_cfg, Arc::new(client)).unwrap();
        let torrent = torrent_with_file("tor1", "a.mkv");
        cache.store().upsert(CachedTorrent::new(torrent.clone()));

        let file = torrent.file("a.mkv").unwrap();
        assert!(cache.resolve_file(&torrent, file).await.is_err());
        assert!(rx.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_rebuild_listing_reflects_store() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, cache_cfg) = test_configs(dir.path());

        let (cache, _rx) =
            TorrentCache::new(&backend, &cache_cfg, Arc::new(MockDebridClient::new()))
                .unwrap();
        cache
            .store()
            .upsert(CachedTorrent::new(torrent_with_file("tor1", "a.mkv")));
        cache
            .store()
            .upsert(CachedTorrent::new(torrent_with_file("tor2", "b.mkv")));

        cache.rebuild_listing();
        let snapshot = cache.listing().snapshot();
        let names: Vec<&str> = snapshot.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["tor1-name", "tor2-name"]);
    }
}
