//! Disk persistence for cached torrents: one JSON snapshot per torrent,
//! written atomically and replayed at startup.

use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{DavError, DavResult};
use crate::types::CachedTorrent;

/// Filesystem layout and formats for one backend's torrent snapshots.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
}

impl SnapshotStore {
    /// Open (creating if needed) the snapshot directory for one backend.
    pub fn open(cache_root: &Path, backend: &str) -> DavResult<Self> {
        let dir = cache_root.join(backend);
        fs::create_dir_all(&dir).map_err(|e| {
            DavError::IoError(format!(
                "cannot create snapshot dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Snapshot files are named after the provider-assigned id; an id
    /// that cannot serve as a plain file name must not touch the disk.
    fn check_id(id: &str) -> DavResult<()> {
        if id.is_empty() || id.contains('/') || id.contains('\\') || id.contains("..") {
            return Err(DavError::InvalidArgument(format!(
                "torrent id {:?} is not usable as a snapshot name",
                id
            )));
        }
        Ok(())
    }

    /// Write one snapshot atomically: temp file in the same directory,
    /// then rename over the final name.
    pub fn save(&self, entry: &CachedTorrent) -> DavResult<()> {
        Self::check_id(entry.id())?;
        let path = self.path_for(entry.id());
        let tmp = path.with_extension("json.tmp");

        let data = serde_json::to_vec_pretty(entry)?;
        fs::write(&tmp, data)
            .map_err(|e| DavError::IoError(format!("write {}: {}", tmp.display(), e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| DavError::IoError(format!("rename {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Delete a snapshot. Missing files are fine; the entry may never have
    /// been flushed.
    pub fn delete(&self, id: &str) -> DavResult<()> {
        Self::check_id(id)?;
        let path = self.path_for(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DavError::IoError(format!(
                "remove {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Load every trustworthy snapshot in the directory.
    ///
    /// A record counts only if it parses and holds at least one file;
    /// anything else is skipped with a warning and left for the next full
    /// sync to repopulate.
    pub fn load_all(&self) -> Vec<CachedTorrent> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(rd) => rd,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot read snapshot dir");
                return Vec::new();
            }
        };

        let mut entries = Vec::new();
        for dirent in read_dir.flatten() {
            let path = dirent.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cannot read snapshot");
                    continue;
                }
            };
            let mut entry: CachedTorrent = match serde_json::from_str(&content) {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unparseable snapshot");
                    continue;
                }
            };
            entry.refresh_completeness();
            if !entry.is_complete {
                warn!(path = %path.display(), "Skipping snapshot with no files");
                continue;
            }
            entries.push(entry);
        }
        entries
    }
}

enum SnapshotOp {
    Save(Box<CachedTorrent>),
    Delete(String),
}

/// Handle to the background task that flushes snapshots, keeping disk I/O
/// off the request path.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::UnboundedSender<SnapshotOp>,
}

impl SnapshotWriter {
    /// Spawn the writer task for a snapshot store.
    pub fn spawn(store: SnapshotStore) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SnapshotOp>();
        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                let result = match &op {
                    SnapshotOp::Save(entry) => store.save(entry),
                    SnapshotOp::Delete(id) => store.delete(id),
                };
                if let Err(e) = result {
                    warn!(error = %e, "Snapshot write failed");
                }
            }
            debug!("Snapshot writer stopped");
        });
        Self { tx }
    }

    pub fn queue_save(&self, entry: &CachedTorrent) {
        let op = SnapshotOp::Save(Box::new(entry.clone()));
        if self.tx.send(op).is_err() {
            warn!(id = entry.id(), "Snapshot writer gone, dropping save");
        }
    }

    pub fn queue_delete(&self, id: &str) {
        if self.tx.send(SnapshotOp::Delete(id.to_string())).is_err() {
            warn!(id, "Snapshot writer gone, dropping delete");
        }
    }
}
