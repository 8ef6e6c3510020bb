//! Test fixtures for torrent and configuration data
//!
//! Provides predefined torrents and config blocks for exercising the
//! cache, sync, and WebDAV layers against the fake provider.

use std::collections::HashMap;
use std::path::Path;

use debrid_dav::config::{BackendConfig, CacheConfig};
use debrid_dav::types::{FolderNaming, Torrent, TorrentFile};

/// Backend block pointing at a provider that is never actually dialed.
pub fn backend_config(name: &str) -> BackendConfig {
    BackendConfig {
        name: name.to_string(),
        url: "https://api.example.com/rest/1.0".to_string(),
        token: "test-token".to_string(),
        folder_naming: FolderNaming::OriginalName,
    }
}

/// Cache block rooted in a temp directory, with intervals short enough
/// for tests that wait on background passes.
pub fn cache_config(root: &Path) -> CacheConfig {
    CacheConfig {
        root: root.to_path_buf(),
        refresh_interval_secs: 1,
        link_refresh_interval_secs: 1,
        default_link_ttl_secs: 3600,
        sync_workers: 4,
    }
}

/// A complete torrent with one file carrying a restricted link.
pub fn single_file_torrent(id: &str, name: &str, file: &str, size: u64) -> Torrent {
    let mut files = HashMap::new();
    files.insert(
        file.to_string(),
        TorrentFile {
            id: "1".to_string(),
            name: file.to_string(),
            path: format!("/{}", file),
            size,
            link: Some(restricted_link(id, file)),
            download_link: None,
            link_generated_at: None,
        },
    );
    Torrent {
        id: id.to_string(),
        info_hash: format!("{:0>40}", id.to_lowercase()),
        name: name.to_string(),
        filename: name.to_string(),
        size,
        status: "downloaded".to_string(),
        progress: 100.0,
        files,
        ..Torrent::default()
    }
}

/// A complete torrent with several files.
pub fn multi_file_torrent(id: &str, name: &str, files: &[(&str, u64)]) -> Torrent {
    let mut torrent = single_file_torrent(id, name, files[0].0, files[0].1);
    torrent.files.clear();
    torrent.size = 0;
    for (i, (file, size)) in files.iter().enumerate() {
        torrent.size += size;
        torrent.files.insert(
            file.to_string(),
            TorrentFile {
                id: format!("{}", i + 1),
                name: file.to_string(),
                path: format!("/{}/{}", name, file),
                size: *size,
                link: Some(restricted_link(id, file)),
                download_link: None,
                link_generated_at: None,
            },
        );
    }
    torrent
}

/// A listing-shaped record: identity and status only, no files yet.
pub fn bare_torrent(id: &str, name: &str) -> Torrent {
    Torrent {
        id: id.to_string(),
        info_hash: format!("{:0>40}", id.to_lowercase()),
        name: name.to_string(),
        filename: name.to_string(),
        status: "downloaded".to_string(),
        progress: 100.0,
        ..Torrent::default()
    }
}

/// The restricted link fixtures attach to a file.
pub fn restricted_link(id: &str, file: &str) -> String {
    format!("https://debrid.example/d/{}/{}", id, file)
}
