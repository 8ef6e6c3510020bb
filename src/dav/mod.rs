//! WebDAV surface: request handling, path resolution, and streaming.

pub mod server;
pub mod stream;
pub mod vfs;
pub mod xml;

pub use server::{router, AppState};
pub use vfs::{DirHandle, FileHandle, Handle, Vfs};

/// Media type for a file name, by extension. Unknown extensions fall back
/// to octet-stream.
pub fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mkv") => "video/x-matroska",
        Some("mp4" | "m4v") => "video/mp4",
        Some("avi") => "video/x-msvideo",
        Some("ts") => "video/mp2t",
        Some("webm") => "video/webm",
        Some("mp3") => "audio/mpeg",
        Some("flac") => "audio/flac",
        Some("aac") => "audio/aac",
        Some("ogg") => "audio/ogg",
        Some("wav") => "audio/wav",
        Some("srt") => "application/x-subrip",
        Some("sub" | "idx") => "text/plain",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("nfo" | "txt") => "text/plain",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("movie.mkv"), "video/x-matroska");
        assert_eq!(content_type_for("MOVIE.MKV"), "video/x-matroska");
        assert_eq!(content_type_for("song.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("subs.srt"), "application/x-subrip");
        assert_eq!(content_type_for("unknown.xyz"), "application/octet-stream");
        assert_eq!(content_type_for("no-extension"), "application/octet-stream");
    }
}
