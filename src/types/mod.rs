//! Core data types for torrents, cached entries, and magnet links.

pub mod magnet;
pub mod torrent;

pub use magnet::Magnet;
pub use torrent::{CachedTorrent, FolderNaming, Torrent, TorrentFile};
