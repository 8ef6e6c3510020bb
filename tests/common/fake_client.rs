//! A scriptable in-memory debrid provider.
//!
//! Integration tests drive the cache and WebDAV layers against this
//! client instead of a live API. Its catalog maps torrent ids to full
//! records; `list_torrents` serves shallow summaries from it and
//! `update_torrent` fills files back in, mirroring how a real provider
//! splits listing from detail. Every call bumps a counter so tests can
//! assert exactly how often the provider was consulted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use debrid_dav::debrid::{DebridClient, ResolvedLink};
use debrid_dav::error::{DavError, DavResult};
use debrid_dav::types::{Magnet, Torrent, TorrentFile};

#[derive(Default)]
pub struct FakeDebridClient {
    /// Full records by id. `update_torrent` and `check_status` copy from
    /// here; an id missing from the catalog behaves as deleted remotely.
    pub catalog: Mutex<HashMap<String, Torrent>>,
    /// Served verbatim by `recent_downloads`.
    pub recent: Mutex<HashMap<String, ResolvedLink>>,
    /// Restricted links that resolve and probe as gone for good.
    pub dead_links: Mutex<HashSet<String>>,
    /// Ids whose `update_torrent` fails with a transient error.
    pub failing_ids: Mutex<HashSet<String>>,
    /// Expiry stamped on links handed out by `resolve_link`.
    pub link_expiry: Mutex<Option<DateTime<Utc>>>,
    /// Id assigned to the next `submit_magnet`; defaults to `sub-<n>`.
    pub next_submit_id: Mutex<Option<String>>,
    /// Artificial latency before `list_torrents` answers.
    pub list_delay: Mutex<Option<Duration>>,
    /// Artificial latency before `update_torrent` answers.
    pub update_delay: Mutex<Option<Duration>>,
    /// Base URL for resolved links; lets tests point them at a local
    /// content server.
    pub cdn_base: Mutex<Option<String>>,
    /// Ids passed to `delete_torrent`, in call order.
    pub deleted: Mutex<Vec<String>>,

    pub list_calls: AtomicUsize,
    pub update_calls: AtomicUsize,
    pub resolve_calls: AtomicUsize,
    pub recent_calls: AtomicUsize,
    pub submit_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub check_calls: AtomicUsize,
}

impl FakeDebridClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_catalog(torrents: Vec<Torrent>) -> Self {
        let client = Self::default();
        for torrent in torrents {
            client.add_torrent(torrent);
        }
        client
    }

    pub fn add_torrent(&self, torrent: Torrent) {
        self.catalog
            .lock()
            .unwrap()
            .insert(torrent.id.clone(), torrent);
    }

    pub fn remove_torrent(&self, id: &str) {
        self.catalog.lock().unwrap().remove(id);
    }

    pub fn mark_dead(&self, restricted: &str) {
        self.dead_links
            .lock()
            .unwrap()
            .insert(restricted.to_string());
    }

    pub fn revive(&self, restricted: &str) {
        self.dead_links.lock().unwrap().remove(restricted);
    }

    pub fn fail_update_for(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_string());
    }

    pub fn set_link_expiry(&self, expires_at: DateTime<Utc>) {
        *self.link_expiry.lock().unwrap() = Some(expires_at);
    }

    pub fn set_next_submit_id(&self, id: &str) {
        *self.next_submit_id.lock().unwrap() = Some(id.to_string());
    }

    pub fn add_recent(&self, restricted: &str, url: &str, expires_at: DateTime<Utc>) {
        self.recent.lock().unwrap().insert(
            restricted.to_string(),
            ResolvedLink {
                url: url.to_string(),
                expires_at: Some(expires_at),
            },
        );
    }

    pub fn set_cdn_base(&self, base: &str) {
        *self.cdn_base.lock().unwrap() = Some(base.trim_end_matches('/').to_string());
    }

    /// The URL `resolve_link` hands out for a given file.
    pub fn resolved_url(id: &str, file: &str) -> String {
        format!("https://cdn.example/{}/{}", id, file)
    }
}

#[async_trait]
impl DebridClient for FakeDebridClient {
    fn name(&self) -> &str {
        "fakedebrid"
    }

    async fn submit_magnet(&self, magnet: &Magnet) -> DavResult<Torrent> {
        let n = self.submit_calls.fetch_add(1, Ordering::SeqCst);
        let id = self
            .next_submit_id
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| format!("sub-{}", n + 1));
        Ok(Torrent {
            id,
            info_hash: magnet.info_hash.clone(),
            name: magnet.name.clone(),
            filename: magnet.name.clone(),
            status: "queued".to_string(),
            ..Torrent::default()
        })
    }

    async fn check_status(&self, torrent: Torrent, _cached_only: bool) -> DavResult<Torrent> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.catalog.lock().unwrap().get(&torrent.id) {
            Some(full) => Ok(full.clone()),
            None => Err(DavError::NotReady(format!(
                "torrent {} is not in the provider cache",
                torrent.id
            ))),
        }
    }

    async fn update_torrent(&self, torrent: &mut Torrent) -> DavResult<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.update_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_ids.lock().unwrap().contains(&torrent.id) {
            return Err(DavError::ApiError {
                status: 503,
                message: format!("scripted failure for {}", torrent.id),
            });
        }
        match self.catalog.lock().unwrap().get(&torrent.id) {
            Some(full) => {
                torrent.name = full.name.clone();
                torrent.filename = full.filename.clone();
                torrent.size = full.size;
                torrent.status = full.status.clone();
                torrent.progress = full.progress;
                torrent.files = full.files.clone();
                Ok(())
            }
            None => Err(DavError::NotFound(format!("torrent {}", torrent.id))),
        }
    }

    async fn list_torrents(&self) -> DavResult<Vec<Torrent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.list_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut listing: Vec<Torrent> = self
            .catalog
            .lock()
            .unwrap()
            .values()
            .map(|full| {
                let mut shallow = full.clone();
                shallow.files = HashMap::new();
                shallow
            })
            .collect();
        listing.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listing)
    }

    async fn resolve_link(&self, torrent: &Torrent, file: &TorrentFile) -> DavResult<ResolvedLink> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        let restricted = file.link.clone().ok_or_else(|| {
            DavError::NotFound(format!("file {} has no restricted link", file.name))
        })?;
        if self.dead_links.lock().unwrap().contains(&restricted) {
            return Err(DavError::LinkUnreachable(restricted));
        }
        let url = match self.cdn_base.lock().unwrap().as_deref() {
            Some(base) => format!("{}/{}/{}", base, torrent.id, file.name),
            None => Self::resolved_url(&torrent.id, &file.name),
        };
        Ok(ResolvedLink {
            url,
            expires_at: *self.link_expiry.lock().unwrap(),
        })
    }

    async fn recent_downloads(&self) -> DavResult<HashMap<String, ResolvedLink>> {
        self.recent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.recent.lock().unwrap().clone())
    }

    async fn delete_torrent(&self, id: &str) -> DavResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.deleted.lock().unwrap().push(id.to_string());
        self.catalog.lock().unwrap().remove(id);
        Ok(())
    }

    async fn check_link(&self, link: &str) -> DavResult<()> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.dead_links.lock().unwrap().contains(link) {
            return Err(DavError::LinkUnreachable(link.to_string()));
        }
        Ok(())
    }
}
