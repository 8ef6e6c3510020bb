//! Hand-rendered WebDAV multistatus bodies.
//!
//! The property set served here is the small one DAV clients actually ask
//! for on listings: displayname, resourcetype, getcontentlength,
//! getcontenttype, getlastmodified.

use chrono::{DateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::borrow::Cow;
use std::io::Write;

use crate::cache::listing::DirEntry;
use crate::dav::content_type_for;

/// Escape a string for use in XML text content.
pub fn escape(s: &str) -> Cow<'_, str> {
    if !s.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len() + 8);
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    Cow::Owned(out)
}

/// Percent-encode one path segment for an href.
pub fn href_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

/// Format a timestamp the way `getlastmodified` wants it (RFC 1123).
pub fn http_date(t: DateTime<Utc>) -> String {
    t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Render a multistatus body for a resource and, at depth 1, its children.
///
/// `href` is the already-encoded path of the resource itself and must end
/// with `/` for collections; child hrefs are derived from it.
pub fn render_multistatus(href: &str, this: &DirEntry, children: Option<&[DirEntry]>) -> String {
    let mut out = String::with_capacity(512 + children.map_or(0, |c| c.len() * 320));
    out.push_str(r#"<?xml version="1.0" encoding="utf-8"?>"#);
    out.push('\n');
    out.push_str(r#"<D:multistatus xmlns:D="DAV:">"#);
    out.push('\n');

    render_response(&mut out, href, this);
    if let Some(children) = children {
        for child in children {
            let child_href = if child.is_dir {
                format!("{}{}/", href, href_segment(&child.name))
            } else {
                format!("{}{}", href, href_segment(&child.name))
            };
            render_response(&mut out, &child_href, child);
        }
    }

    out.push_str("</D:multistatus>\n");
    out
}

fn render_response(out: &mut String, href: &str, entry: &DirEntry) {
    out.push_str("<D:response>\n");
    out.push_str("<D:href>");
    out.push_str(href);
    out.push_str("</D:href>\n");
    out.push_str("<D:propstat>\n<D:prop>\n");

    out.push_str("<D:displayname>");
    out.push_str(&escape(&entry.name));
    out.push_str("</D:displayname>\n");

    if entry.is_dir {
        out.push_str("<D:resourcetype><D:collection/></D:resourcetype>\n");
    } else {
        out.push_str("<D:resourcetype/>\n");
        out.push_str(&format!(
            "<D:getcontentlength>{}</D:getcontentlength>\n",
            entry.size
        ));
        out.push_str(&format!(
            "<D:getcontenttype>{}</D:getcontenttype>\n",
            content_type_for(&entry.name)
        ));
    }

    out.push_str(&format!(
        "<D:getlastmodified>{}</D:getlastmodified>\n",
        http_date(entry.modified)
    ));

    out.push_str("</D:prop>\n<D:status>HTTP/1.1 200 OK</D:status>\n</D:propstat>\n");
    out.push_str("</D:response>\n");
}

/// Gzip a rendered body. Writing into a Vec cannot fail in practice, but
/// the encoder API surfaces io errors, so callers decide the fallback.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(
        Vec::with_capacity(data.len() / 2),
        Compression::default(),
    );
    encoder.write_all(data)?;
    encoder.finish()
}
