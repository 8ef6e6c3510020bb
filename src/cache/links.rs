//! Cache of resolved download URLs, keyed by restricted link.
//!
//! Built on `moka` for O(1) operations, atomic updates, and lock-free
//! reads. Expiry is per entry: links carry the instant the provider (or
//! the configured default) says they die, wired into moka through its
//! `Expiry` policy. Lookups double-check the instant themselves so a
//! not-yet-collected entry can never leak past its expiry.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use moka::future::Cache as MokaCache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::debrid::DebridClient;
use crate::error::{DavError, DavResult};
use crate::types::{Torrent, TorrentFile};

/// A resolved URL and the instant it stops working.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedLink {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

struct LinkExpiry;

impl Expiry<String, CachedLink> for LinkExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedLink,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some((value.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedLink,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some((value.expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

/// Expiring map from restricted link to resolved URL.
pub struct LinkCache {
    inner: MokaCache<String, CachedLink>,
    default_ttl: ChronoDuration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LinkCache {
    pub fn new(max_entries: u64, default_ttl: Duration) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(max_entries)
            .expire_after(LinkExpiry)
            .build();

        Self {
            inner,
            default_ttl: ChronoDuration::from_std(default_ttl)
                .unwrap_or_else(|_| ChronoDuration::seconds(1800)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn effective_expiry(&self, declared: Option<DateTime<Utc>>) -> DateTime<Utc> {
        declared.unwrap_or_else(|| Utc::now() + self.default_ttl)
    }

    /// Look up a resolved link. Entries past their instant are treated as
    /// absent even if moka has not collected them yet.
    pub async fn get(&self, restricted: &str) -> Option<CachedLink> {
        match self.inner.get(restricted).await {
            Some(link) if !link.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(link)
            }
            Some(_) => {
                self.inner.invalidate(restricted).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert a resolved link. A missing expiry gets the default TTL;
    /// an already-dead link is not stored at all.
    pub async fn insert(
        &self,
        restricted: String,
        url: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<CachedLink> {
        let link = CachedLink {
            url,
            expires_at: self.effective_expiry(expires_at),
        };
        if link.is_expired() {
            return None;
        }
        self.inner.insert(restricted, link.clone()).await;
        Some(link)
    }

    /// Drop one entry, forcing the next resolve to hit the provider.
    pub async fn invalidate(&self, restricted: &str) {
        self.inner.invalidate(restricted).await;
    }

    /// Return the cached URL for a file, resolving through the provider on
    /// a miss. One remote call per expiry window.
    pub async fn resolve(
        &self,
        client: &dyn DebridClient,
        torrent: &Torrent,
        file: &TorrentFile,
    ) -> DavResult<CachedLink> {
        let restricted = file.link.clone().ok_or_else(|| {
            DavError::NotFound(format!(
                "file {} of torrent {} has no restricted link",
                file.name, torrent.id
            ))
        })?;

        if let Some(hit) = self.get(&restricted).await {
            trace!(file = %file.name, "Link cache hit");
            return Ok(hit);
        }

        let resolved = client.resolve_link(torrent, file).await?;
        let link = self
            .insert(restricted, resolved.url.clone(), resolved.expires_at)
            .await
            .unwrap_or(CachedLink {
                url: resolved.url,
                expires_at: self.effective_expiry(resolved.expires_at),
            });
        Ok(link)
    }

    /// Pre-populate from the provider's recent downloads, skipping entries
    /// already past their expiry. Returns how many links were loaded.
    pub async fn warm_up(&self, client: &dyn DebridClient) -> DavResult<usize> {
        let downloads = client.recent_downloads().await?;
        let mut loaded = 0;
        for (restricted, resolved) in downloads {
            if self
                .insert(restricted, resolved.url, resolved.expires_at)
                .await
                .is_some()
            {
                loaded += 1;
            }
        }
        debug!(loaded, "Link cache warmed up");
        Ok(loaded)
    }

    /// Drop entries whose instant has passed. moka expires lazily, so this
    /// keeps `len` honest between passes.
    pub async fn evict_expired(&self) -> usize {
        let mut removed = 0;
        let stale: Vec<String> = self
            .inner
            .iter()
            .filter(|(_, link)| link.is_expired())
            .map(|(key, _)| (*key).clone())
            .collect();
        for key in stale {
            self.inner.invalidate(&key).await;
            removed += 1;
        }
        self.inner.run_pending_tasks().await;
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.len(),
        }
    }
}
