//! Path resolution over the cached backends.
//!
//! The path space is `/<backend>/<scope>/<torrent>/<file>`. Everything
//! down to the file level is answered from the entry store and listing
//! cache without remote calls; only reading file content opens an HTTP
//! stream, and only after the download link has been resolved.

use chrono::{DateTime, Utc};
use reqwest::Client;
use std::collections::HashMap;
use std::io::SeekFrom;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::cache::{DirEntry, TorrentCache, SCOPES};
use crate::dav::stream::HttpByteStream;
use crate::error::{DavError, DavResult};
use crate::types::{Torrent, TorrentFile};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// An opened path: directory or file.
pub enum Handle {
    Dir(DirHandle),
    File(FileHandle),
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handle::Dir(d) => f.debug_tuple("Dir").field(&d.name()).finish(),
            Handle::File(h) => f.debug_tuple("File").field(&h.name()).finish(),
        }
    }
}

/// Directory handle with a readdir cursor over a fixed child list.
pub struct DirHandle {
    name: String,
    modified: DateTime<Utc>,
    entries: Vec<DirEntry>,
    cursor: usize,
}

impl DirHandle {
    fn new(name: String, modified: DateTime<Utc>, entries: Vec<DirEntry>) -> Self {
        Self {
            name,
            modified,
            entries,
            cursor: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn modified(&self) -> DateTime<Utc> {
        self.modified
    }

    /// All children, regardless of cursor position.
    pub fn entries(&self) -> &[DirEntry] {
        &self.entries
    }

    /// Paginated iteration. `count <= 0` drains the rest; a positive
    /// count returns at most that many and advances the cursor. An empty
    /// batch means the listing is exhausted.
    pub fn readdir(&mut self, count: i64) -> Vec<DirEntry> {
        let remaining = self.entries.len() - self.cursor;
        let take = if count <= 0 {
            remaining
        } else {
            remaining.min(count as usize)
        };
        let batch = self.entries[self.cursor..self.cursor + take].to_vec();
        self.cursor += take;
        batch
    }
}

/// File handle bound to one file of one cached torrent. Opening it costs
/// nothing; the HTTP stream appears on the first read.
pub struct FileHandle {
    cache: Arc<TorrentCache>,
    http: Client,
    torrent: Torrent,
    file: TorrentFile,
    modified: DateTime<Utc>,
    offset: u64,
    stream: Option<HttpByteStream>,
}

impl FileHandle {
    pub fn name(&self) -> &str {
        &self.file.name
    }

    pub fn size(&self) -> u64 {
        self.file.size
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn metadata(&self) -> DirEntry {
        DirEntry::file(self.file.name.clone(), self.file.size, self.modified)
    }

    /// Move the logical offset, clamped to `[0, size]`. The stream is not
    /// touched; the next read decides whether it can still be used.
    pub fn seek(&mut self, pos: SeekFrom) -> DavResult<u64> {
        let size = self.file.size as i64;
        let target = match pos {
            SeekFrom::Start(o) => i64::try_from(o).unwrap_or(i64::MAX),
            SeekFrom::Current(d) => self.offset as i64 + d,
            SeekFrom::End(d) => size + d,
        };
        self.offset = target.clamp(0, size) as u64;
        trace!(file = %self.file.name, offset = self.offset, "Seek");
        Ok(self.offset)
    }

    /// Read from the current offset. Opens or reopens the ranged stream
    /// as needed; one transparent reopen is attempted when an established
    /// stream fails mid-read. Returns 0 at end of file.
    pub async fn read(&mut self, buf: &mut [u8]) -> DavResult<usize> {
        if buf.is_empty() || self.offset >= self.file.size {
            self.stream = None;
            return Ok(0);
        }
        let want = buf.len().min((self.file.size - self.offset) as usize);
        let buf = &mut buf[..want];

        let mut reopened = false;
        loop {
            let reusable = matches!(&self.stream, Some(s) if s.can_serve(self.offset));
            if !reusable {
                self.stream = Some(self.open_stream().await?);
            }
            let target = self.offset;
            let Some(stream) = self.stream.as_mut() else {
                continue;
            };
            let result = match stream.skip(target.saturating_sub(stream.position())).await {
                Ok(_) => stream.read(buf).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(n) => {
                    self.offset += n as u64;
                    if n == 0 || self.offset >= self.file.size {
                        // End of content; close the connection.
                        self.stream = None;
                    }
                    return Ok(n);
                }
                Err(e) if e.is_transient() && !reopened => {
                    debug!(file = %self.file.name, error = %e, "Stream failed, reopening once");
                    reopened = true;
                    self.stream = None;
                }
                Err(e) => {
                    self.stream = None;
                    return Err(e);
                }
            }
        }
    }

    /// Drop the underlying connection, keeping the handle usable.
    pub fn close(&mut self) {
        self.stream = None;
    }

    async fn open_stream(&self) -> DavResult<HttpByteStream> {
        let link = self.cache.resolve_file(&self.torrent, &self.file).await?;
        match HttpByteStream::open(&self.http, &link.url, self.offset).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                if e.is_repair_candidate() {
                    if let Some(restricted) = self.file.link.as_deref() {
                        self.cache.links().invalidate(restricted).await;
                    }
                    self.cache.submit_repair(&self.torrent.id);
                }
                Err(e)
            }
        }
    }
}

/// The virtual filesystem over all configured backends.
pub struct Vfs {
    backends: HashMap<String, Arc<TorrentCache>>,
    http: Client,
}

impl Vfs {
    pub fn new(backends: HashMap<String, Arc<TorrentCache>>) -> DavResult<Self> {
        // Content downloads must not carry a total-duration timeout; a
        // movie-sized body takes as long as it takes.
        let http = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        Ok(Self { backends, http })
    }

    pub fn backend(&self, name: &str) -> Option<&Arc<TorrentCache>> {
        self.backends.get(name)
    }

    /// Resolve a decoded slash path to a handle. Directories come from
    /// the listing cache and entry store; files carry no open stream yet.
    pub fn open(&self, path: &str) -> DavResult<Handle> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Ok(Handle::Dir(self.root_dir())),
            [backend] => {
                let cache = self.require_backend(backend)?;
                let built_at = cache.listing().snapshot().built_at;
                let entries = SCOPES
                    .iter()
                    .map(|scope| DirEntry::dir(scope.to_string(), built_at))
                    .collect();
                Ok(Handle::Dir(DirHandle::new(
                    backend.to_string(),
                    built_at,
                    entries,
                )))
            }
            [backend, scope] => {
                let cache = self.require_backend(backend)?;
                Self::require_scope(scope)?;
                let snapshot = cache.listing().snapshot();
                Ok(Handle::Dir(DirHandle::new(
                    scope.to_string(),
                    snapshot.built_at,
                    snapshot.entries.clone(),
                )))
            }
            [backend, scope, torrent] => {
                let cache = self.require_backend(backend)?;
                Self::require_scope(scope)?;
                let entry = cache
                    .store()
                    .get_by_name(torrent)
                    .ok_or_else(|| DavError::NotFound(format!("torrent {}", torrent)))?;
                let modified = entry.torrent.added_on.unwrap_or(entry.last_read);
                let mut files: Vec<DirEntry> = entry
                    .torrent
                    .files
                    .values()
                    .map(|f| DirEntry::file(f.name.clone(), f.size, modified))
                    .collect();
                files.sort_by(|a, b| a.name.cmp(&b.name));
                Ok(Handle::Dir(DirHandle::new(
                    torrent.to_string(),
                    modified,
                    files,
                )))
            }
            [backend, scope, torrent, file] => {
                let cache = self.require_backend(backend)?;
                Self::require_scope(scope)?;
                let entry = cache
                    .store()
                    .get_by_name(torrent)
                    .ok_or_else(|| DavError::NotFound(format!("torrent {}", torrent)))?;
                let record = entry
                    .torrent
                    .file(file)
                    .ok_or_else(|| DavError::NotFound(format!("file {}", file)))?
                    .clone();
                let modified = entry.torrent.added_on.unwrap_or(entry.last_read);
                Ok(Handle::File(FileHandle {
                    cache: cache.clone(),
                    http: self.http.clone(),
                    torrent: entry.torrent,
                    file: record,
                    modified,
                    offset: 0,
                    stream: None,
                }))
            }
            _ => Err(DavError::NotDirectory),
        }
    }

    /// Metadata without touching any link. Never triggers a remote call.
    pub fn stat(&self, path: &str) -> DavResult<DirEntry> {
        match self.open(path)? {
            Handle::Dir(d) => Ok(DirEntry::dir(d.name().to_string(), d.modified())),
            Handle::File(f) => Ok(f.metadata()),
        }
    }

    pub fn write(&self, path: &str) -> DavResult<()> {
        Err(Self::read_only("write", path))
    }

    pub fn mkdir(&self, path: &str) -> DavResult<()> {
        Err(Self::read_only("mkdir", path))
    }

    pub fn rename(&self, from: &str, _to: &str) -> DavResult<()> {
        Err(Self::read_only("rename", from))
    }

    pub fn remove_all(&self, path: &str) -> DavResult<()> {
        Err(Self::read_only("remove", path))
    }

    fn read_only(op: &str, path: &str) -> DavError {
        DavError::PermissionDenied(format!("filesystem is read-only: {} {}", op, path))
    }

    fn root_dir(&self) -> DirHandle {
        let now = Utc::now();
        let mut names: Vec<&String> = self.backends.keys().collect();
        names.sort();
        let entries = names
            .into_iter()
            .map(|n| DirEntry::dir(n.clone(), now))
            .collect();
        DirHandle::new(String::new(), now, entries)
    }

    fn require_backend(&self, name: &str) -> DavResult<&Arc<TorrentCache>> {
        self.backends
            .get(name)
            .ok_or_else(|| DavError::NotFound(format!("backend {}", name)))
    }

    fn require_scope(scope: &str) -> DavResult<()> {
        if SCOPES.contains(&scope) {
            Ok(())
        } else {
            Err(DavError::NotFound(format!("scope {}", scope)))
        }
    }
}
