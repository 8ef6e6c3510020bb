//! Pre-rendered directory listings.
//!
//! Every mutation of the entry store marks this cache dirty; a dedicated
//! worker coalesces bursts into one rebuild. A rebuild sorts the live
//! entries by folder name and renders the PROPFIND bodies (plain and
//! gzipped) for each scope and depth, so listing requests are served
//! straight from memory.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::dav::xml;
use crate::types::{CachedTorrent, FolderNaming};

/// Scope directories every backend exposes. Both list the same torrents;
/// media managers expect an aggregate view next to the per-kind one.
pub const SCOPES: [&str; 2] = ["__all__", "torrents"];

/// Listing depth a PROPFIND asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    Zero,
    One,
}

/// One entry in a rendered directory listing.
#[derive(Debug, Clone, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub modified: DateTime<Utc>,
}

impl DirEntry {
    pub fn dir(name: String, modified: DateTime<Utc>) -> Self {
        Self {
            name,
            size: 0,
            is_dir: true,
            modified,
        }
    }

    pub fn file(name: String, size: u64, modified: DateTime<Utc>) -> Self {
        Self {
            name,
            size,
            is_dir: false,
            modified,
        }
    }
}

/// A PROPFIND body in both encodings a client may accept.
#[derive(Debug, Clone)]
pub struct PropfindPayload {
    pub plain: Bytes,
    /// Empty only if compression failed at build time.
    pub gzipped: Bytes,
}

/// Immutable product of one rebuild.
pub struct ListingSnapshot {
    /// Torrent folders sorted by name
    pub entries: Vec<DirEntry>,
    payloads: HashMap<(&'static str, Depth), PropfindPayload>,
    pub built_at: DateTime<Utc>,
}

impl ListingSnapshot {
    pub fn payload(&self, scope: &str, depth: Depth) -> Option<&PropfindPayload> {
        SCOPES
            .iter()
            .find(|s| **s == scope)
            .and_then(|s| self.payloads.get(&(*s, depth)))
    }
}

/// Holder of the current listing snapshot for one backend.
pub struct ListingCache {
    backend: String,
    current: RwLock<Arc<ListingSnapshot>>,
    dirty: AtomicBool,
    notify: Notify,
}

impl ListingCache {
    pub fn new(backend: impl Into<String>) -> Self {
        let backend = backend.into();
        let empty = Arc::new(Self::build_snapshot(&backend, Vec::new()));
        Self {
            backend,
            current: RwLock::new(empty),
            dirty: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Current snapshot; cheap, hands out the Arc.
    pub fn snapshot(&self) -> Arc<ListingSnapshot> {
        self.current.read().unwrap().clone()
    }

    /// Flag the listing as stale and wake the rebuild worker.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Consume the dirty flag. Returns whether a rebuild is owed.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Wait until something marks the listing dirty.
    pub async fn changed(&self) {
        self.notify.notified().await;
    }

    /// Rebuild the snapshot from the given entries and swap it in.
    pub fn rebuild(&self, entries: &[CachedTorrent], naming: FolderNaming) {
        let mut dir_entries: Vec<DirEntry> = entries
            .iter()
            .map(|e| DirEntry::dir(e.folder_name(naming), e.last_read))
            .collect();
        dir_entries.sort_by(|a, b| a.name.cmp(&b.name));

        let snapshot = Arc::new(Self::build_snapshot(&self.backend, dir_entries));
        debug!(
            backend = %self.backend,
            entries = snapshot.entries.len(),
            "Listing rebuilt"
        );
        *self.current.write().unwrap() = snapshot;
    }

    fn build_snapshot(backend: &str, entries: Vec<DirEntry>) -> ListingSnapshot {
        let built_at = Utc::now();
        let mut payloads = HashMap::with_capacity(SCOPES.len() * 2);

        for scope in SCOPES {
            let href = format!(
                "/{}/{}/",
                xml::href_segment(backend),
                xml::href_segment(scope)
            );
            let this = DirEntry::dir(scope.to_string(), built_at);
            for depth in [Depth::Zero, Depth::One] {
                let children = match depth {
                    Depth::Zero => None,
                    Depth::One => Some(entries.as_slice()),
                };
                let body = xml::render_multistatus(&href, &this, children);
                let gzipped = match xml::gzip(body.as_bytes()) {
                    Ok(gz) => Bytes::from(gz),
                    Err(e) => {
                        warn!(scope, error = %e, "Compressing listing payload failed");
                        Bytes::new()
                    }
                };
                payloads.insert(
                    (scope, depth),
                    PropfindPayload {
                        plain: Bytes::from(body.into_bytes()),
                        gzipped,
                    },
                );
            }
        }

        ListingSnapshot {
            entries,
            payloads,
            built_at,
        }
    }
}
