use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::{Display, EnumString};

use crate::types::Magnet;

/// Strategy for deriving the folder name a torrent is exposed under.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FolderNaming {
    /// Use the original filename reported by the provider
    #[default]
    OriginalName,
    /// Use the provider-assigned torrent id
    TorrentId,
    /// Use the original filename with its extension stripped
    OriginalNameNoExt,
}

/// A single file inside a torrent, as the provider reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TorrentFile {
    /// Provider-assigned file id
    pub id: String,
    /// Basename the file is listed under
    pub name: String,
    /// Path inside the torrent, as reported by the provider
    pub path: String,
    /// File size in bytes
    pub size: u64,
    /// Restricted link for this file, resolvable through the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// Directly fetchable URL, if one has been resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_link: Option<String>,
    /// When the download link was last resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_generated_at: Option<DateTime<Utc>>,
}

/// A torrent as known to a debrid provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Torrent {
    /// Provider-assigned identity
    pub id: String,
    pub info_hash: String,
    /// Display name reported by the provider
    pub name: String,
    /// Original filename of the torrent payload
    #[serde(default)]
    pub filename: String,
    /// Total size in bytes
    #[serde(default)]
    pub size: u64,
    /// Provider status tag; vocabulary differs per provider
    pub status: String,
    /// Download progress in percent
    #[serde(default)]
    pub progress: f64,
    /// Download speed in bytes per second
    #[serde(default)]
    pub speed: u64,
    #[serde(default)]
    pub seeders: u32,
    /// When the provider registered the torrent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added_on: Option<DateTime<Utc>>,
    /// Magnet the torrent was created from, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub magnet: Option<Magnet>,
    /// Files keyed by filename
    #[serde(default)]
    pub files: HashMap<String, TorrentFile>,
}

impl Torrent {
    /// Look up a file by its listed name.
    pub fn file(&self, name: &str) -> Option<&TorrentFile> {
        self.files.get(name)
    }

    pub fn file_mut(&mut self, name: &str) -> Option<&mut TorrentFile> {
        self.files.get_mut(name)
    }

    /// Derive the folder name this torrent is exposed under.
    ///
    /// Falls back to the display name when the provider did not report an
    /// original filename.
    pub fn folder_name(&self, naming: FolderNaming) -> String {
        let base = if self.filename.is_empty() {
            &self.name
        } else {
            &self.filename
        };
        match naming {
            FolderNaming::OriginalName => base.clone(),
            FolderNaming::TorrentId => self.id.clone(),
            FolderNaming::OriginalNameNoExt => match base.rsplit_once('.') {
                Some((stem, ext)) if !stem.is_empty() && ext.len() <= 4 => stem.to_string(),
                _ => base.clone(),
            },
        }
    }
}

/// A torrent held in the entry store, together with cache bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTorrent {
    pub torrent: Torrent,
    /// When this entry was last read back from the provider
    pub last_read: DateTime<Utc>,
    /// Whether the files collection has been populated
    pub is_complete: bool,
}

impl CachedTorrent {
    /// Wrap a torrent fetched from the provider. Completeness is derived
    /// from whether any files are present.
    pub fn new(torrent: Torrent) -> Self {
        let is_complete = !torrent.files.is_empty();
        Self {
            torrent,
            last_read: Utc::now(),
            is_complete,
        }
    }

    pub fn id(&self) -> &str {
        &self.torrent.id
    }

    pub fn folder_name(&self, naming: FolderNaming) -> String {
        self.torrent.folder_name(naming)
    }

    /// Re-derive completeness from the files collection. Used after loading
    /// a snapshot from disk so a hand-edited or truncated record cannot
    /// claim to be complete while holding no files.
    pub fn refresh_completeness(&mut self) {
        self.is_complete = !self.torrent.files.is_empty();
    }
}
