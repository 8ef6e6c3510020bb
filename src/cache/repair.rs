//! Repair pipeline for torrents the provider has let rot.
//!
//! Suspect torrents are pushed onto a bounded queue and handled one at a
//! time by a dedicated worker. Repairs mutate shared store state and hit
//! a rate-limited API, so they are never run in parallel with each other.
//! Duplicate submissions for an identity already queued or in progress
//! are dropped, and a full queue sheds instead of blocking the caller.

use dashmap::DashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::TorrentCache;
use crate::error::{DavError, DavResult};
use crate::types::{CachedTorrent, Magnet, Torrent};

pub const REPAIR_QUEUE_CAPACITY: usize = 100;

/// What a repair pass concluded about one torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Links checked out; the refreshed record was kept.
    Healthy,
    /// The torrent was re-acquired under a new provider identity.
    Resubmitted { new_id: String },
}

/// Producer half of the repair queue. Cheap to clone and hand to anyone
/// who can observe a dead link.
#[derive(Clone)]
pub struct RepairQueue {
    tx: mpsc::Sender<String>,
    in_flight: Arc<DashSet<String>>,
}

/// Consumer half, owned by the single repair worker.
pub struct RepairReceiver {
    pub(crate) rx: mpsc::Receiver<String>,
    pub(crate) in_flight: Arc<DashSet<String>>,
}

impl RepairQueue {
    pub fn new(capacity: usize) -> (Self, RepairReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let in_flight = Arc::new(DashSet::new());
        (
            Self {
                tx,
                in_flight: in_flight.clone(),
            },
            RepairReceiver { rx, in_flight },
        )
    }

    /// Enqueue a torrent for repair. Returns whether it was accepted;
    /// duplicates and overflow are dropped.
    pub fn submit(&self, torrent_id: &str) -> bool {
        if !self.in_flight.insert(torrent_id.to_string()) {
            debug!(id = torrent_id, "Repair already pending, dropping");
            return false;
        }
        match self.tx.try_send(torrent_id.to_string()) {
            Ok(()) => {
                debug!(id = torrent_id, "Queued for repair");
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.in_flight.remove(torrent_id);
                warn!(id = torrent_id, "Repair queue full, shedding request");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.in_flight.remove(torrent_id);
                warn!(id = torrent_id, "Repair worker gone, dropping request");
                false
            }
        }
    }

    /// Identities currently queued or being repaired.
    pub fn pending(&self) -> usize {
        self.in_flight.len()
    }
}

/// Drain the repair queue serially until shutdown. Failures are logged
/// and the identity is released so a later attempt is not blocked.
pub fn spawn_repair_worker(
    cache: Arc<TorrentCache>,
    mut receiver: RepairReceiver,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(backend = cache.name(), "Repair worker started");
        loop {
            let id = tokio::select! {
                _ = shutdown.recv() => break,
                next = receiver.rx.recv() => match next {
                    Some(id) => id,
                    None => break,
                },
            };
            match cache.repair_torrent(&id).await {
                Ok(RepairOutcome::Healthy) => {
                    debug!(id, "Repair check found torrent healthy")
                }
                Ok(RepairOutcome::Resubmitted { new_id }) => {
                    info!(old_id = id, new_id, "Repaired torrent under new identity")
                }
                Err(e) => warn!(id, error = %e, "Repair failed"),
            }
            receiver.in_flight.remove(&id);
        }
        info!(backend = cache.name(), "Repair worker stopped");
    })
}

impl TorrentCache {
    /// Verify one torrent and re-acquire it if the provider has lost the
    /// content behind its links.
    pub async fn repair_torrent(&self, id: &str) -> DavResult<RepairOutcome> {
        let Some(entry) = self.store().get(id) else {
            debug!(id, "Torrent vanished before repair ran");
            return Ok(RepairOutcome::Healthy);
        };
        let mut torrent = entry.torrent;

        // Missing restricted links may just mean a stale record. Refresh
        // before judging; a dead refresh is itself the verdict.
        let stale = torrent.files.is_empty()
            || torrent.files.values().any(|f| f.link.is_none());
        if stale {
            match self.client().update_torrent(&mut torrent).await {
                Ok(()) => {}
                Err(e)
                    if e.is_repair_candidate()
                        || matches!(e, DavError::NotFound(_) | DavError::TorrentFailed(_)) =>
                {
                    info!(id, error = %e, "Refresh confirmed torrent is gone");
                    return self.resubmit(&torrent).await;
                }
                Err(e) => return Err(e),
            }
        }

        if self.is_broken(&torrent).await? {
            return self.resubmit(&torrent).await;
        }

        self.store().upsert(CachedTorrent::new(torrent));
        Ok(RepairOutcome::Healthy)
    }

    /// A torrent is broken when a file still has no restricted link after
    /// refresh, or when the provider reports a link unreachable. Transient
    /// probe failures are inconclusive and never trigger a resubmit.
    async fn is_broken(&self, torrent: &Torrent) -> DavResult<bool> {
        if torrent.files.is_empty() {
            return Ok(true);
        }
        for file in torrent.files.values() {
            let Some(link) = file.link.as_deref() else {
                warn!(id = %torrent.id, file = %file.name, "File has no restricted link");
                return Ok(true);
            };
            match self.client().check_link(link).await {
                Ok(()) => {}
                Err(e) if e.is_repair_candidate() => {
                    warn!(id = %torrent.id, file = %file.name, error = %e, "Link unreachable");
                    return Ok(true);
                }
                Err(e) if e.is_transient() => {
                    debug!(id = %torrent.id, error = %e, "Link probe inconclusive");
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(false)
    }

    /// Resubmit the torrent's magnet under a new provider identity, wait
    /// for it to land in the provider's cache, then swap it into the
    /// store in place of the old identity.
    async fn resubmit(&self, old: &Torrent) -> DavResult<RepairOutcome> {
        let magnet = match old.magnet.clone() {
            Some(m) => m,
            None if !old.info_hash.is_empty() => {
                Magnet::new(old.info_hash.clone(), old.name.clone())
            }
            None => {
                return Err(DavError::InvalidArgument(format!(
                    "torrent {} has no magnet or info hash to resubmit",
                    old.id
                )));
            }
        };

        info!(id = %old.id, info_hash = %magnet.info_hash, "Resubmitting broken torrent");
        let submitted = self.client().submit_magnet(&magnet).await?;
        let submitted_id = submitted.id.clone();
        let mut ready = match self.client().check_status(submitted, true).await {
            Ok(t) => t,
            Err(e) => {
                // Not instantly available again; drop the half-acquired
                // copy so retries start clean.
                if let Err(del) = self.client().delete_torrent(&submitted_id).await {
                    warn!(id = %submitted_id, error = %del, "Could not clean up failed resubmit");
                }
                return Err(e);
            }
        };

        let new_id = ready.id.clone();
        if ready.magnet.is_none() {
            ready.magnet = Some(magnet);
        }
        if ready.added_on.is_none() {
            ready.added_on = old.added_on;
        }

        if new_id != old.id {
            self.store().remove(&old.id);
            if let Err(e) = self.client().delete_torrent(&old.id).await {
                warn!(id = %old.id, error = %e, "Could not delete replaced torrent");
            }
        }
        self.store().upsert(CachedTorrent::new(ready));
        Ok(RepairOutcome::Resubmitted { new_id })
    }
}
