//! HTTP layer: axum router speaking just enough WebDAV for read-only
//! mounting by DAV clients and media managers.
//!
//! Listing requests at the scope level are answered from the
//! pre-rendered payloads without touching XML rendering or the remote
//! API; deeper listings render on demand from the entry store. File
//! content honors byte ranges and streams straight from the backing
//! HTTP stream.

use axum::body::Body;
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, HeaderName, Method, StatusCode};
use axum::response::{AppendHeaders, IntoResponse, Response};
use axum::routing::{any, get};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use std::io::SeekFrom;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::cache::{Depth, DirEntry};
use crate::dav::vfs::{FileHandle, Handle, Vfs};
use crate::dav::{content_type_for, xml};
use crate::error::{DavError, DavResult};

const XML_CONTENT_TYPE: &str = r#"application/xml; charset="utf-8""#;
const BODY_CHUNK: u64 = 64 * 1024;

/// Shared state behind every request handler.
#[derive(Clone)]
pub struct AppState {
    pub vfs: Arc<Vfs>,
    /// Basic auth credentials; `None` disables authentication.
    pub auth: Option<(String, String)>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", any(dispatch_root))
        .route("/{*path}", any(dispatch))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn dispatch_root(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    handle_request(state, method, String::new(), headers).await
}

async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    handle_request(state, method, path, headers).await
}

async fn handle_request(
    state: AppState,
    method: Method,
    path: String,
    headers: HeaderMap,
) -> Response {
    if !authorized(state.auth.as_ref(), &headers) {
        return (
            StatusCode::UNAUTHORIZED,
            [(
                header::WWW_AUTHENTICATE,
                r#"Basic realm="debrid-dav""#.to_string(),
            )],
            "authentication required",
        )
            .into_response();
    }

    let result = match method {
        Method::OPTIONS => Ok(options_response()),
        Method::GET => serve_content(&state, &path, &headers, false).await,
        Method::HEAD => serve_content(&state, &path, &headers, true).await,
        Method::PUT => state
            .vfs
            .write(&path)
            .map(|_| StatusCode::CREATED.into_response()),
        Method::DELETE => state
            .vfs
            .remove_all(&path)
            .map(|_| StatusCode::NO_CONTENT.into_response()),
        _ => match method.as_str() {
            "PROPFIND" => serve_propfind(&state, &path, &headers),
            "MKCOL" => state
                .vfs
                .mkdir(&path)
                .map(|_| StatusCode::CREATED.into_response()),
            "MOVE" => {
                let destination = headers
                    .get("destination")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("");
                state
                    .vfs
                    .rename(&path, destination)
                    .map(|_| StatusCode::CREATED.into_response())
            }
            "COPY" | "PROPPATCH" | "LOCK" | "UNLOCK" => Err(DavError::PermissionDenied(
                "filesystem is read-only".to_string(),
            )),
            _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
        },
    };

    match result {
        Ok(response) => response,
        Err(e) => error_response(&method, &path, e),
    }
}

fn error_response(method: &Method, path: &str, err: DavError) -> Response {
    let status = err.status();
    if status.is_server_error() {
        warn!(%method, path, error = %err, "Request failed");
    } else {
        debug!(%method, path, error = %err, "Request rejected");
    }
    (status, err.to_string()).into_response()
}

fn authorized(auth: Option<&(String, String)>, headers: &HeaderMap) -> bool {
    let Some((user, pass)) = auth else {
        return true;
    };
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = BASE64.decode(encoded) else {
        return false;
    };
    let Ok(credentials) = String::from_utf8(decoded) else {
        return false;
    };
    credentials
        .split_once(':')
        .map(|(u, p)| u == user && p == pass)
        .unwrap_or(false)
}

fn options_response() -> Response {
    (
        StatusCode::OK,
        [
            (
                header::ALLOW,
                "OPTIONS, GET, HEAD, PROPFIND".to_string(),
            ),
            (HeaderName::from_static("dav"), "1".to_string()),
        ],
    )
        .into_response()
}

fn serve_propfind(state: &AppState, path: &str, headers: &HeaderMap) -> DavResult<Response> {
    let depth = match headers.get("depth").and_then(|v| v.to_str().ok()) {
        Some("0") => Depth::Zero,
        _ => Depth::One,
    };
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Scope listings are the hot path; serve the pre-rendered body.
    if let [backend, scope] = segments.as_slice() {
        if let Some(cache) = state.vfs.backend(backend) {
            let snapshot = cache.listing().snapshot();
            if let Some(payload) = snapshot.payload(scope, depth) {
                let gzip = accepts_gzip(headers) && !payload.gzipped.is_empty();
                let body = if gzip {
                    payload.gzipped.clone()
                } else {
                    payload.plain.clone()
                };
                let mut out = vec![(header::CONTENT_TYPE, XML_CONTENT_TYPE.to_string())];
                if gzip {
                    out.push((header::CONTENT_ENCODING, "gzip".to_string()));
                }
                return Ok((StatusCode::MULTI_STATUS, AppendHeaders(out), Body::from(body))
                    .into_response());
            }
        }
    }

    let name = segments.last().copied().unwrap_or("/").to_string();
    let body = match state.vfs.open(path)? {
        Handle::Dir(dir) => {
            let href = encoded_href(&segments, true);
            let this = DirEntry::dir(name, dir.modified());
            let children = match depth {
                Depth::Zero => None,
                Depth::One => Some(dir.entries()),
            };
            xml::render_multistatus(&href, &this, children)
        }
        Handle::File(file) => {
            let href = encoded_href(&segments, false);
            xml::render_multistatus(&href, &file.metadata(), None)
        }
    };
    Ok((
        StatusCode::MULTI_STATUS,
        [(header::CONTENT_TYPE, XML_CONTENT_TYPE.to_string())],
        Body::from(body),
    )
        .into_response())
}

async fn serve_content(
    state: &AppState,
    path: &str,
    headers: &HeaderMap,
    head_only: bool,
) -> DavResult<Response> {
    match state.vfs.open(path)? {
        Handle::Dir(dir) => {
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let title = segments.last().copied().unwrap_or("/");
            let base = encoded_href(&segments, true);
            let body = if head_only {
                Body::empty()
            } else {
                Body::from(render_index(title, &base, dir.entries()))
            };
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8".to_string())],
                body,
            )
                .into_response())
        }
        Handle::File(mut file) => {
            let size = file.size();
            let content_type = content_type_for(file.name()).to_string();

            let range = match headers.get(header::RANGE).and_then(|v| v.to_str().ok()) {
                Some(value) => match parse_range(value, size) {
                    Ok(range) => range,
                    Err(()) => {
                        return Ok((
                            StatusCode::RANGE_NOT_SATISFIABLE,
                            [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                        )
                            .into_response());
                    }
                },
                None => None,
            };

            match range {
                Some((start, end)) => {
                    let length = end - start + 1;
                    let out = [
                        (header::CONTENT_TYPE, content_type),
                        (header::ACCEPT_RANGES, "bytes".to_string()),
                        (
                            header::CONTENT_RANGE,
                            format!("bytes {}-{}/{}", start, end, size),
                        ),
                        (header::CONTENT_LENGTH, length.to_string()),
                    ];
                    let body = if head_only {
                        Body::empty()
                    } else {
                        file.seek(SeekFrom::Start(start))?;
                        file_body(file, length)
                    };
                    Ok((StatusCode::PARTIAL_CONTENT, out, body).into_response())
                }
                None => {
                    let out = [
                        (header::CONTENT_TYPE, content_type),
                        (header::ACCEPT_RANGES, "bytes".to_string()),
                        (header::CONTENT_LENGTH, size.to_string()),
                    ];
                    let body = if head_only {
                        Body::empty()
                    } else {
                        file_body(file, size)
                    };
                    Ok((StatusCode::OK, out, body).into_response())
                }
            }
        }
    }
}

/// Wrap an open file handle into a chunked response body of at most
/// `limit` bytes. Mid-body errors abort the transfer; range requests
/// make the retry resumable.
fn file_body(file: FileHandle, limit: u64) -> Body {
    let stream = futures::stream::unfold((file, limit), |(mut file, remaining)| async move {
        if remaining == 0 {
            return None;
        }
        let want = remaining.min(BODY_CHUNK) as usize;
        let mut buf = vec![0u8; want];
        match file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), (file, remaining - n as u64)))
            }
            Err(e) => {
                warn!(error = %e, "Content stream aborted mid-response");
                Some((Err(std::io::Error::other(e.to_string())), (file, 0)))
            }
        }
    });
    Body::from_stream(stream)
}

/// Parse a `Range` header against the file size. `Ok(None)` means serve
/// the full body, `Err(())` means not satisfiable. Only the first range
/// of a multi-range request is honored.
fn parse_range(value: &str, size: u64) -> Result<Option<(u64, u64)>, ()> {
    let Some(spec) = value.strip_prefix("bytes=") else {
        return Ok(None);
    };
    let Some(first) = spec.split(',').next() else {
        return Ok(None);
    };
    let Some((start_s, end_s)) = first.trim().split_once('-') else {
        return Ok(None);
    };
    if size == 0 {
        return Err(());
    }

    let (start, end) = if start_s.is_empty() {
        let suffix: u64 = end_s.parse().map_err(|_| ())?;
        if suffix == 0 {
            return Err(());
        }
        (size.saturating_sub(suffix), size - 1)
    } else {
        let start: u64 = start_s.parse().map_err(|_| ())?;
        let end = if end_s.is_empty() {
            size - 1
        } else {
            end_s.parse::<u64>().map_err(|_| ())?.min(size - 1)
        };
        (start, end)
    };

    if start >= size || start > end {
        return Err(());
    }
    Ok(Some((start, end)))
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|enc| enc.trim().split(';').next().map(str::trim) == Some("gzip"))
        })
        .unwrap_or(false)
}

fn encoded_href(segments: &[&str], dir: bool) -> String {
    if segments.is_empty() {
        return "/".to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push('/');
        out.push_str(&xml::href_segment(segment));
    }
    if dir {
        out.push('/');
    }
    out
}

fn render_index(title: &str, base: &str, entries: &[DirEntry]) -> String {
    let mut out = String::with_capacity(256 + entries.len() * 96);
    out.push_str("<!DOCTYPE html>\n<html><head><title>");
    out.push_str(&xml::escape(title));
    out.push_str("</title></head><body>\n<h1>");
    out.push_str(&xml::escape(title));
    out.push_str("</h1>\n<ul>\n");
    for entry in entries {
        let href = if entry.is_dir {
            format!("{}{}/", base, xml::href_segment(&entry.name))
        } else {
            format!("{}{}", base, xml::href_segment(&entry.name))
        };
        out.push_str("<li><a href=\"");
        out.push_str(&href);
        out.push_str("\">");
        out.push_str(&xml::escape(&entry.name));
        out.push_str("</a></li>\n");
    }
    out.push_str("</ul>\n</body></html>\n");
    out
}
