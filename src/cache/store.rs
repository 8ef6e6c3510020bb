//! In-memory entry store: an identity index and a folder-name index kept
//! behind one lock, mirrored to disk snapshots as they change.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::RwLock;

use crate::cache::listing::ListingCache;
use crate::cache::persist::SnapshotWriter;
use crate::types::{CachedTorrent, FolderNaming};

#[derive(Default)]
struct Indexes {
    by_id: HashMap<String, CachedTorrent>,
    name_to_id: HashMap<String, String>,
}

/// Store of all torrents known for one backend.
///
/// Both indexes move together under the same lock, so a lookup can never
/// observe an entry in one index but not the other. Mutations queue a
/// snapshot write and mark the directory listing dirty.
pub struct EntryStore {
    naming: FolderNaming,
    inner: RwLock<Indexes>,
    writer: SnapshotWriter,
    listing: Arc<ListingCache>,
}

impl EntryStore {
    pub fn new(naming: FolderNaming, writer: SnapshotWriter, listing: Arc<ListingCache>) -> Self {
        Self {
            naming,
            inner: RwLock::new(Indexes::default()),
            writer,
            listing,
        }
    }

    pub fn naming(&self) -> FolderNaming {
        self.naming
    }

    pub fn get(&self, id: &str) -> Option<CachedTorrent> {
        self.inner.read().unwrap().by_id.get(id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<CachedTorrent> {
        let inner = self.inner.read().unwrap();
        let id = inner.name_to_id.get(name)?;
        inner.by_id.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().unwrap().by_id.contains_key(id)
    }

    /// Snapshot of every live entry, in no particular order.
    pub fn all(&self) -> Vec<CachedTorrent> {
        self.inner.read().unwrap().by_id.values().cloned().collect()
    }

    pub fn ids(&self) -> HashSet<String> {
        self.inner.read().unwrap().by_id.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace an entry under both indexes.
    ///
    /// Folder-name collisions resolve last-write-wins: the newest entry
    /// owns the name, the shadowed one stays reachable by id. A rename
    /// drops the old name mapping if this entry still owns it.
    pub fn upsert(&self, entry: CachedTorrent) {
        let id = entry.id().to_string();
        let name = entry.folder_name(self.naming);
        {
            let mut inner = self.inner.write().unwrap();
            let previous_name = inner.by_id.get(&id).map(|old| old.folder_name(self.naming));
            if let Some(previous) = previous_name {
                if previous != name
                    && inner.name_to_id.get(&previous).map(String::as_str) == Some(id.as_str())
                {
                    inner.name_to_id.remove(&previous);
                }
            }
            inner.name_to_id.insert(name, id.clone());
            inner.by_id.insert(id, entry.clone());
        }
        self.writer.queue_save(&entry);
        self.listing.mark_dirty();
    }

    /// Remove an entry from both indexes, its snapshot, and the listing.
    /// The name mapping is only dropped if this entry still owns it.
    pub fn remove(&self, id: &str) -> Option<CachedTorrent> {
        let entry = {
            let mut inner = self.inner.write().unwrap();
            let entry = inner.by_id.remove(id)?;
            let name = entry.folder_name(self.naming);
            if inner.name_to_id.get(&name).map(String::as_str) == Some(id) {
                inner.name_to_id.remove(&name);
            }
            entry
        };
        self.writer.queue_delete(id);
        self.listing.mark_dirty();
        Some(entry)
    }

    /// Bulk insert of entries replayed from disk. Snapshots already exist,
    /// so nothing is queued for writing; the listing is marked once.
    pub fn load_many(&self, entries: Vec<CachedTorrent>) -> usize {
        let count = entries.len();
        if count == 0 {
            return 0;
        }
        {
            let mut inner = self.inner.write().unwrap();
            for entry in entries {
                let id = entry.id().to_string();
                let name = entry.folder_name(self.naming);
                inner.name_to_id.insert(name, id.clone());
                inner.by_id.insert(id, entry);
            }
        }
        self.listing.mark_dirty();
        count
    }

    /// Record a freshly resolved download link on one file. The folder
    /// name cannot change here, so the listing is left alone.
    pub fn record_link(
        &self,
        id: &str,
        file_name: &str,
        url: &str,
        generated_at: DateTime<Utc>,
    ) -> bool {
        let snapshot = {
            let mut inner = self.inner.write().unwrap();
            let Some(entry) = inner.by_id.get_mut(id) else {
                return false;
            };
            let Some(file) = entry.torrent.files.get_mut(file_name) else {
                return false;
            };
            file.download_link = Some(url.to_string());
            file.link_generated_at = Some(generated_at);
            entry.last_read = Utc::now();
            entry.clone()
        };
        self.writer.queue_save(&snapshot);
        true
    }
}
