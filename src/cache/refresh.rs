//! Synchronization passes that keep the local view of a backend fresh.
//!
//! Three passes, each behind its own advisory lock so a pass that is
//! still running when its timer fires is skipped instead of queued:
//! the startup full sync, the fast incremental torrent refresh, and the
//! slow download-link refresh. Passes can overlap with each other and
//! with reads, never with themselves.

use futures::future::join_all;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TorrentCache;
use crate::error::DavResult;
use crate::types::{CachedTorrent, Torrent};

/// What one synchronization pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub added: usize,
    pub removed: usize,
    pub failed: usize,
    /// True when the pass found a previous run still in progress and
    /// did nothing.
    pub skipped: bool,
    /// True when a shutdown signal cut the pass short. In-flight fetches
    /// finished; queued ones were abandoned.
    pub cancelled: bool,
}

impl SyncOutcome {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

impl TorrentCache {
    /// Startup pass: replay on-disk snapshots, fetch the complete remote
    /// listing, reconcile by identity, and fetch files for every addition
    /// through a bounded worker pool.
    ///
    /// The pool watches `cancel`: once the shutdown broadcast fires,
    /// workers let their in-flight fetch land and stop pulling from the
    /// queue. A receiver whose sender is gone never cancels.
    pub async fn full_sync(&self, mut cancel: broadcast::Receiver<()>) -> DavResult<SyncOutcome> {
        let Ok(_guard) = self.full_sync_guard().try_lock() else {
            debug!(backend = self.name(), "Full sync already running, skipping");
            return Ok(SyncOutcome::skipped());
        };
        let started = Instant::now();

        if self.store().is_empty() {
            let replayed = self.store().load_many(self.snapshots().load_all());
            if replayed > 0 {
                info!(backend = self.name(), replayed, "Replayed snapshots from disk");
            }
        }

        let remote = self.client().list_torrents().await?;
        let remote_ids: std::collections::HashSet<&str> =
            remote.iter().map(|t| t.id.as_str()).collect();

        let mut outcome = SyncOutcome::default();
        for id in self.store().ids() {
            if !remote_ids.contains(id.as_str()) {
                self.store().remove(&id);
                outcome.removed += 1;
            }
        }

        let additions: VecDeque<Torrent> = remote
            .into_iter()
            .filter(|t| !self.store().contains(&t.id))
            .collect();
        let (added, failed, cancelled) = self.fetch_pool(additions, &mut cancel).await;
        outcome.added = added;
        outcome.failed = failed;
        outcome.cancelled = cancelled;

        self.rebuild_listing();
        info!(
            backend = self.name(),
            added = outcome.added,
            removed = outcome.removed,
            failed = outcome.failed,
            cancelled = outcome.cancelled,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Full sync finished"
        );
        Ok(outcome)
    }

    /// Fast pass: diff remote identities against the store only. New
    /// torrents get the fetch-then-insert treatment, vanished ones are
    /// dropped immediately.
    pub async fn refresh_torrents(&self) -> DavResult<SyncOutcome> {
        let Ok(_guard) = self.refresh_guard().try_lock() else {
            debug!(backend = self.name(), "Torrent refresh already running, skipping");
            return Ok(SyncOutcome::skipped());
        };

        let remote = self.client().list_torrents().await?;
        let remote_ids: std::collections::HashSet<&str> =
            remote.iter().map(|t| t.id.as_str()).collect();

        let mut outcome = SyncOutcome::default();
        for id in self.store().ids() {
            if !remote_ids.contains(id.as_str()) {
                info!(backend = self.name(), id = %id, "Torrent gone from remote, removing");
                self.store().remove(&id);
                outcome.removed += 1;
            }
        }

        for torrent in remote {
            if self.store().contains(&torrent.id) {
                continue;
            }
            let id = torrent.id.clone();
            match self.fetch_and_insert(torrent).await {
                Ok(()) => outcome.added += 1,
                Err(e) => {
                    warn!(backend = self.name(), id = %id, error = %e, "Failed to fetch new torrent");
                    outcome.failed += 1;
                }
            }
        }

        if outcome.added > 0 || outcome.removed > 0 {
            debug!(
                backend = self.name(),
                added = outcome.added,
                removed = outcome.removed,
                "Torrent refresh applied changes"
            );
        }
        Ok(outcome)
    }

    /// Slow pass: re-warm the link cache from the provider's recent
    /// downloads and drop entries past their expiry.
    pub async fn refresh_links(&self) -> DavResult<usize> {
        let Ok(_guard) = self.link_guard().try_lock() else {
            debug!(backend = self.name(), "Link refresh already running, skipping");
            return Ok(0);
        };

        let loaded = self.links().warm_up(self.client().as_ref()).await?;
        let evicted = self.links().evict_expired().await;
        let stats = self.links().stats();
        debug!(
            backend = self.name(),
            loaded,
            evicted,
            hits = stats.hits,
            misses = stats.misses,
            size = stats.size,
            "Link refresh finished"
        );
        Ok(loaded)
    }

    /// Fetch a torrent's files from the provider and insert the completed
    /// record into the store.
    pub(crate) async fn fetch_and_insert(&self, mut torrent: Torrent) -> DavResult<()> {
        self.client().update_torrent(&mut torrent).await?;
        self.store().upsert(CachedTorrent::new(torrent));
        Ok(())
    }

    /// Drain `work` through a bounded pool of workers. Per-item failures
    /// are counted, never fatal to the pool. When `cancel` fires, workers
    /// finish the item they hold and stop popping; the rest of the queue
    /// is dropped.
    async fn fetch_pool(
        &self,
        work: VecDeque<Torrent>,
        cancel: &mut broadcast::Receiver<()>,
    ) -> (usize, usize, bool) {
        if work.is_empty() {
            return (0, 0, false);
        }
        let worker_count = self.sync_workers().min(work.len()).max(1);
        let queue = Arc::new(tokio::sync::Mutex::new(work));
        let added = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);
        let cancelled = AtomicBool::new(false);

        let workers = (0..worker_count).map(|_| {
            let queue = Arc::clone(&queue);
            let added = &added;
            let failed = &failed;
            let cancelled = &cancelled;
            async move {
                loop {
                    if cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    let next = queue.lock().await.pop_front();
                    let Some(torrent) = next else { break };
                    let id = torrent.id.clone();
                    match self.fetch_and_insert(torrent).await {
                        Ok(()) => {
                            added.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            warn!(backend = self.name(), id = %id, error = %e, "Failed to fetch torrent files");
                            failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
            }
        });
        let pool = join_all(workers);
        tokio::pin!(pool);
        tokio::select! {
            _ = &mut pool => {}
            _ = cancel_signal(cancel) => {
                warn!(backend = self.name(), "Shutdown during full sync, draining in-flight fetches");
                cancelled.store(true, Ordering::Release);
                pool.await;
            }
        }

        (
            added.load(Ordering::Relaxed),
            failed.load(Ordering::Relaxed),
            cancelled.load(Ordering::Relaxed),
        )
    }
}

/// Resolve once the shutdown broadcast fires. A closed channel has no
/// sender left to cancel anything, so it never resolves.
async fn cancel_signal(cancel: &mut broadcast::Receiver<()>) {
    loop {
        match cancel.recv().await {
            Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => return,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}

/// Spawn the periodic maintenance loops for one backend: incremental
/// torrent refresh, link refresh, and the listing rebuild worker. All
/// three stop on the shutdown broadcast.
pub fn spawn_refresh_workers(
    cache: Arc<TorrentCache>,
    shutdown: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(3);

    let torrents = cache.clone();
    let mut stop = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        let mut tick = tokio::time::interval(torrents.refresh_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = tick.tick() => {
                    if let Err(e) = torrents.refresh_torrents().await {
                        warn!(backend = torrents.name(), error = %e, "Torrent refresh failed");
                    }
                }
            }
        }
        debug!(backend = torrents.name(), "Torrent refresh loop stopped");
    }));

    let links = cache.clone();
    let mut stop = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        let mut tick = tokio::time::interval(links.link_refresh_interval());
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick fires immediately; the startup path already warmed
        // the cache, so swallow it.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = tick.tick() => {
                    if let Err(e) = links.refresh_links().await {
                        warn!(backend = links.name(), error = %e, "Link refresh failed");
                    }
                }
            }
        }
        debug!(backend = links.name(), "Link refresh loop stopped");
    }));

    let listing = cache;
    let mut stop = shutdown.subscribe();
    handles.push(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.recv() => break,
                _ = listing.listing().changed() => {
                    listing.rebuild_listing();
                }
            }
        }
        debug!(backend = listing.name(), "Listing rebuild loop stopped");
    }));

    handles
}
