use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{DavError, DavResult};

/// Identifying metadata of a magnet link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Magnet {
    pub info_hash: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trackers: Vec<String>,
}

impl Magnet {
    pub fn new(info_hash: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info_hash: info_hash.into().to_lowercase(),
            name: name.into(),
            trackers: Vec::new(),
        }
    }

    /// Parse a `magnet:?...` URI. The `xt` parameter with a btih urn is
    /// required; `dn` and `tr` are optional.
    pub fn parse(uri: &str) -> DavResult<Self> {
        let query = uri
            .strip_prefix("magnet:?")
            .ok_or_else(|| DavError::InvalidArgument(format!("not a magnet uri: {}", uri)))?;

        let mut info_hash = None;
        let mut name = String::new();
        let mut trackers = Vec::new();

        for pair in query.split('&') {
            let (key, value) = match pair.split_once('=') {
                Some(kv) => kv,
                None => continue,
            };
            match key {
                "xt" => {
                    if let Some(hash) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(hash.to_lowercase());
                    }
                }
                "dn" => {
                    name = urlencoding::decode(value)
                        .map_err(|e| DavError::ParseError(e.to_string()))?
                        .replace('+', " ");
                }
                "tr" => {
                    let tracker = urlencoding::decode(value)
                        .map_err(|e| DavError::ParseError(e.to_string()))?;
                    trackers.push(tracker.into_owned());
                }
                _ => {}
            }
        }

        let info_hash = info_hash
            .ok_or_else(|| DavError::InvalidArgument("magnet uri has no btih hash".to_string()))?;
        if info_hash.len() != 40 && info_hash.len() != 32 {
            return Err(DavError::InvalidArgument(format!(
                "unexpected info hash length: {}",
                info_hash.len()
            )));
        }

        Ok(Self {
            info_hash,
            name,
            trackers,
        })
    }

    /// Render back into a magnet URI.
    pub fn uri(&self) -> String {
        let mut out = format!("magnet:?xt=urn:btih:{}", self.info_hash);
        if !self.name.is_empty() {
            out.push_str("&dn=");
            out.push_str(&urlencoding::encode(&self.name));
        }
        for tracker in &self.trackers {
            out.push_str("&tr=");
            out.push_str(&urlencoding::encode(tracker));
        }
        out
    }
}

impl fmt::Display for Magnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri())
    }
}
