//! Provider boundary: everything the rest of the crate knows about a
//! debrid service goes through [`DebridClient`].

pub mod restclient;

pub use restclient::RestClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::DavResult;
use crate::types::{Magnet, Torrent, TorrentFile};

/// A download URL the provider has unrestricted for direct fetching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    pub url: String,
    /// Expiry declared by the provider, when it declares one
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capability set every debrid provider exposes. Callers never branch on
/// which provider sits behind the trait object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DebridClient: Send + Sync {
    /// Name this backend is configured under.
    fn name(&self) -> &str;

    /// Register a magnet with the provider. Returns the provider's view of
    /// the new torrent, which may not have files populated yet.
    async fn submit_magnet(&self, magnet: &Magnet) -> DavResult<Torrent>;

    /// Drive a submitted torrent to a terminal state, selecting files when
    /// the provider asks for a selection. With `cached_only` set, bail out
    /// early instead of waiting for the provider to fetch from the swarm.
    async fn check_status(&self, torrent: Torrent, cached_only: bool) -> DavResult<Torrent>;

    /// Refresh a single torrent in place with the provider's authoritative
    /// state, including its file list and restricted links.
    async fn update_torrent(&self, torrent: &mut Torrent) -> DavResult<()>;

    /// List all torrents the account holds. Summaries only; files are not
    /// populated.
    async fn list_torrents(&self) -> DavResult<Vec<Torrent>>;

    /// Exchange a file's restricted link for a directly fetchable URL.
    async fn resolve_link(&self, torrent: &Torrent, file: &TorrentFile) -> DavResult<ResolvedLink>;

    /// Recently generated download links the provider still considers
    /// valid, keyed by restricted link.
    async fn recent_downloads(&self) -> DavResult<HashMap<String, ResolvedLink>>;

    /// Remove a torrent from the provider account.
    async fn delete_torrent(&self, id: &str) -> DavResult<()>;

    /// Probe whether a restricted link is still redeemable.
    async fn check_link(&self, link: &str) -> DavResult<()>;
}
