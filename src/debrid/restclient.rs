//! REST client for debrid providers exposing a Real-Debrid style API.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, instrument, trace, warn};

use crate::config::BackendConfig;
use crate::debrid::{DebridClient, ResolvedLink};
use crate::error::{DavError, DavResult};
use crate::types::{Magnet, Torrent, TorrentFile};

/// How often a pending torrent is re-polled while waiting for it to land.
const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Poll budget before a pending torrent is declared stuck.
const MAX_STATUS_POLLS: u32 = 60;
/// How long providers keep generated download links redeemable.
const LINK_VALIDITY_DAYS: i64 = 7;

/// HTTP client for a single debrid provider account.
pub struct RestClient {
    client: Client,
    base_url: String,
    name: String,
    token: String,
    max_retries: u32,
    retry_delay: Duration,
}

impl RestClient {
    /// Create a client with default retry configuration.
    pub fn new(name: String, base_url: String, token: String) -> DavResult<Self> {
        Self::with_config(name, base_url, token, 3, Duration::from_millis(500))
    }

    pub fn from_config(config: &BackendConfig) -> DavResult<Self> {
        Self::new(
            config.name.clone(),
            config.url.clone(),
            config.token.clone(),
        )
    }

    /// Create a client with custom retry configuration.
    pub fn with_config(
        name: String,
        base_url: String,
        token: String,
        max_retries: u32,
        retry_delay: Duration,
    ) -> DavResult<Self> {
        // Validate URL at construction time (fail fast on invalid URL)
        let _ = reqwest::Url::parse(&base_url)
            .map_err(|e| DavError::InvalidArgument(format!("Invalid URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| DavError::IoError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            name,
            token,
            max_retries,
            retry_delay,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.token)
    }

    /// Execute request with automatic retry for transient failures
    async fn execute_with_retry<F, Fut>(
        &self,
        endpoint: &str,
        operation: F,
    ) -> DavResult<reqwest::Response>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = reqwest::Result<reqwest::Response>>,
    {
        let mut last_error = None;
        let mut final_result = None;

        for attempt in 0..=self.max_retries {
            match operation().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() && attempt < self.max_retries {
                        warn!(
                            endpoint,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            "Server error, retrying"
                        );
                        sleep(self.retry_delay * (attempt + 1)).await;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS && attempt < self.max_retries {
                        let retry_after = response
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.retry_delay * (attempt + 1));

                        warn!(
                            endpoint,
                            status = status.as_u16(),
                            retry_after_secs = retry_after.as_secs(),
                            attempt = attempt + 1,
                            "Rate limited"
                        );
                        sleep(retry_after).await;
                        continue;
                    }

                    final_result = Some(Ok(response));
                    break;
                }
                Err(e) => {
                    let api_error: DavError = e.into();
                    last_error = Some(api_error.clone());

                    if api_error.is_transient() && attempt < self.max_retries {
                        warn!(endpoint, attempt = attempt + 1, error = %api_error, "Retrying");
                        sleep(self.retry_delay * (attempt + 1)).await;
                    } else {
                        final_result = Some(Err(api_error));
                        break;
                    }
                }
            }
        }

        match final_result {
            Some(Ok(response)) => Ok(response),
            Some(Err(api_error)) => Err(api_error),
            None => Err(last_error
                .unwrap_or_else(|| DavError::NotReady("Retry limit exceeded".to_string()))),
        }
    }

    /// Helper to check response status and convert errors
    async fn check_response(&self, response: reqwest::Response) -> DavResult<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::UNAUTHORIZED {
            let message = response.text().await.unwrap_or_default();
            Err(DavError::PermissionDenied(format!(
                "Authentication failed: {}",
                if message.is_empty() {
                    "Invalid credentials".to_string()
                } else {
                    message
                }
            )))
        } else {
            let message = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    return Err(DavError::NetworkError(format!(
                        "Failed to read error response body: {}",
                        e
                    )));
                }
            };
            Err(DavError::ApiError {
                status: status.as_u16(),
                message,
            })
        }
    }

    /// Generic GET request that returns JSON
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        url: &str,
    ) -> DavResult<T> {
        let response = self
            .execute_with_retry(endpoint, || {
                self.client
                    .get(url)
                    .header("Authorization", self.auth_header())
                    .send()
            })
            .await?;
        let response = self.check_response(response).await?;
        Ok(response.json().await?)
    }

    /// Generic POST request with a form body that returns JSON
    async fn post_form<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        url: &str,
        form: &[(&str, &str)],
    ) -> DavResult<T> {
        let response = self
            .execute_with_retry(endpoint, || {
                self.client
                    .post(url)
                    .header("Authorization", self.auth_header())
                    .form(form)
                    .send()
            })
            .await?;
        let response = self.check_response(response).await?;
        Ok(response.json().await?)
    }

    /// POST a form where the provider answers with an empty body
    async fn post_form_empty(
        &self,
        endpoint: &str,
        url: &str,
        form: &[(&str, &str)],
    ) -> DavResult<()> {
        let response = self
            .execute_with_retry(endpoint, || {
                self.client
                    .post(url)
                    .header("Authorization", self.auth_header())
                    .form(form)
                    .send()
            })
            .await?;
        self.check_response(response).await?;
        Ok(())
    }

    /// Mark every file of a torrent for download.
    async fn select_all_files(&self, id: &str) -> DavResult<()> {
        let url = format!("{}/torrents/selectFiles/{}", self.base_url, id);
        let endpoint = format!("/torrents/selectFiles/{}", id);
        debug!(backend = %self.name, id, "Selecting all files");
        self.post_form_empty(&endpoint, &url, &[("files", "all")])
            .await
    }

    fn torrent_from_summary(&self, summary: TorrentSummary) -> Torrent {
        Torrent {
            id: summary.id,
            info_hash: summary.hash.to_lowercase(),
            name: summary.filename.clone(),
            filename: summary.filename,
            size: summary.bytes,
            status: summary.status,
            progress: summary.progress,
            speed: summary.speed,
            seeders: summary.seeders,
            added_on: summary.added,
            magnet: None,
            files: HashMap::new(),
        }
    }

    /// Overlay a detail response onto a torrent. Selected files pair with
    /// the links array in selection order.
    fn apply_detail(&self, torrent: &mut Torrent, detail: TorrentDetail) {
        torrent.info_hash = detail.summary.hash.to_lowercase();
        torrent.name = detail.summary.filename.clone();
        torrent.filename = detail
            .original_filename
            .unwrap_or_else(|| detail.summary.filename.clone());
        torrent.size = detail.summary.bytes;
        torrent.status = detail.summary.status;
        torrent.progress = detail.summary.progress;
        torrent.speed = detail.summary.speed;
        torrent.seeders = detail.summary.seeders;
        if detail.summary.added.is_some() {
            torrent.added_on = detail.summary.added;
        }

        let mut files = HashMap::new();
        let mut links = detail.links.into_iter();
        for file in detail.files.into_iter().filter(|f| f.selected != 0) {
            let name = file
                .path
                .rsplit('/')
                .next()
                .unwrap_or(file.path.as_str())
                .to_string();
            files.insert(
                name.clone(),
                TorrentFile {
                    id: file.id.to_string(),
                    name,
                    path: file.path,
                    size: file.bytes,
                    link: links.next(),
                    download_link: None,
                    link_generated_at: None,
                },
            );
        }
        torrent.files = files;
    }
}

fn is_terminal_ok(status: &str) -> bool {
    status == "downloaded"
}

fn is_terminal_failed(status: &str) -> bool {
    matches!(status, "magnet_error" | "error" | "virus" | "dead")
}

fn needs_selection(status: &str) -> bool {
    status == "waiting_files_selection"
}

fn is_fetching(status: &str) -> bool {
    matches!(status, "queued" | "downloading" | "compressing" | "uploading")
}

#[async_trait]
impl DebridClient for RestClient {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(skip(self, magnet), fields(api_op = "submit_magnet", backend = %self.name))]
    async fn submit_magnet(&self, magnet: &Magnet) -> DavResult<Torrent> {
        let url = format!("{}/torrents/addMagnet", self.base_url);
        let uri = magnet.uri();

        let added: AddMagnetResponse = self
            .post_form("/torrents/addMagnet", &url, &[("magnet", uri.as_str())])
            .await?;
        debug!(backend = %self.name, id = %added.id, hash = %magnet.info_hash, "Magnet submitted");

        let mut torrent = Torrent {
            id: added.id,
            info_hash: magnet.info_hash.clone(),
            name: magnet.name.clone(),
            filename: magnet.name.clone(),
            size: 0,
            status: "magnet_conversion".to_string(),
            progress: 0.0,
            speed: 0,
            seeders: 0,
            added_on: Some(Utc::now()),
            magnet: Some(magnet.clone()),
            files: HashMap::new(),
        };
        self.update_torrent(&mut torrent).await?;
        Ok(torrent)
    }

    #[instrument(
        skip(self, torrent),
        fields(api_op = "check_status", backend = %self.name, id = %torrent.id)
    )]
    async fn check_status(&self, mut torrent: Torrent, cached_only: bool) -> DavResult<Torrent> {
        for _ in 0..MAX_STATUS_POLLS {
            self.update_torrent(&mut torrent).await?;
            let status = torrent.status.clone();
            trace!(id = %torrent.id, status = %status, progress = torrent.progress);

            if is_terminal_ok(&status) {
                return Ok(torrent);
            }
            if is_terminal_failed(&status) {
                return Err(DavError::TorrentFailed(format!(
                    "torrent {} ended in status {}",
                    torrent.id, status
                )));
            }
            if needs_selection(&status) {
                self.select_all_files(&torrent.id).await?;
                continue;
            }
            if is_fetching(&status) && cached_only {
                return Err(DavError::NotReady(format!(
                    "torrent {} is not cached by the provider (status {})",
                    torrent.id, status
                )));
            }

            sleep(STATUS_POLL_INTERVAL).await;
        }

        Err(DavError::TimedOut(format!(
            "torrent {} still {} after {} polls",
            torrent.id, torrent.status, MAX_STATUS_POLLS
        )))
    }

    #[instrument(
        skip(self, torrent),
        fields(api_op = "update_torrent", backend = %self.name, id = %torrent.id)
    )]
    async fn update_torrent(&self, torrent: &mut Torrent) -> DavResult<()> {
        let url = format!("{}/torrents/info/{}", self.base_url, torrent.id);
        let endpoint = format!("/torrents/info/{}", torrent.id);

        let detail: TorrentDetail = self.get_json(&endpoint, &url).await?;
        self.apply_detail(torrent, detail);
        Ok(())
    }

    #[instrument(skip(self), fields(api_op = "list_torrents", backend = %self.name))]
    async fn list_torrents(&self) -> DavResult<Vec<Torrent>> {
        let url = format!("{}/torrents", self.base_url);

        let summaries: Vec<TorrentSummary> = self.get_json("/torrents", &url).await?;
        debug!(backend = %self.name, count = summaries.len(), "Listed torrents");
        Ok(summaries
            .into_iter()
            .map(|s| self.torrent_from_summary(s))
            .collect())
    }

    #[instrument(
        skip(self, torrent, file),
        fields(api_op = "resolve_link", backend = %self.name, id = %torrent.id, file = %file.name)
    )]
    async fn resolve_link(&self, torrent: &Torrent, file: &TorrentFile) -> DavResult<ResolvedLink> {
        let link = file.link.as_deref().ok_or_else(|| {
            DavError::NotFound(format!(
                "file {} of torrent {} has no restricted link",
                file.name, torrent.id
            ))
        })?;

        let url = format!("{}/unrestrict/link", self.base_url);
        let unrestricted: UnrestrictResponse = self
            .post_form("/unrestrict/link", &url, &[("link", link)])
            .await?;
        trace!(id = %torrent.id, file = %file.name, "Link resolved");

        Ok(ResolvedLink {
            url: unrestricted.download,
            expires_at: None,
        })
    }

    #[instrument(skip(self), fields(api_op = "recent_downloads", backend = %self.name))]
    async fn recent_downloads(&self) -> DavResult<HashMap<String, ResolvedLink>> {
        let url = format!("{}/downloads", self.base_url);

        let entries: Vec<DownloadEntry> = self.get_json("/downloads", &url).await?;
        let mut links = HashMap::with_capacity(entries.len());
        for entry in entries {
            let expires_at = entry
                .generated
                .map(|g| g + ChronoDuration::days(LINK_VALIDITY_DAYS));
            links.insert(
                entry.link,
                ResolvedLink {
                    url: entry.download,
                    expires_at,
                },
            );
        }
        Ok(links)
    }

    #[instrument(skip(self), fields(api_op = "delete_torrent", backend = %self.name, id))]
    async fn delete_torrent(&self, id: &str) -> DavResult<()> {
        let url = format!("{}/torrents/delete/{}", self.base_url, id);
        let endpoint = format!("/torrents/delete/{}", id);

        let response = self
            .execute_with_retry(&endpoint, || {
                self.client
                    .delete(&url)
                    .header("Authorization", self.auth_header())
                    .send()
            })
            .await?;
        self.check_response(response).await?;
        debug!(backend = %self.name, id, "Torrent deleted");
        Ok(())
    }

    #[instrument(skip(self, link), fields(api_op = "check_link", backend = %self.name))]
    async fn check_link(&self, link: &str) -> DavResult<()> {
        let url = format!("{}/unrestrict/check", self.base_url);

        let response = self
            .execute_with_retry("/unrestrict/check", || {
                self.client
                    .post(&url)
                    .header("Authorization", self.auth_header())
                    .form(&[("link", link)])
                    .send()
            })
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(DavError::LinkUnreachable(format!(
                "provider reports link gone ({})",
                response.status().as_u16()
            )))
        }
    }
}

// === Wire types ===

#[derive(Debug, Deserialize)]
struct TorrentSummary {
    id: String,
    filename: String,
    #[serde(default)]
    hash: String,
    #[serde(default)]
    bytes: u64,
    status: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    speed: u64,
    #[serde(default)]
    seeders: u32,
    #[serde(default)]
    added: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TorrentDetail {
    #[serde(flatten)]
    summary: TorrentSummary,
    #[serde(default)]
    original_filename: Option<String>,
    #[serde(default)]
    files: Vec<FileEntry>,
    #[serde(default)]
    links: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    id: u64,
    path: String,
    bytes: u64,
    #[serde(default)]
    selected: u8,
}

#[derive(Debug, Deserialize)]
struct AddMagnetResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct UnrestrictResponse {
    download: String,
}

#[derive(Debug, Deserialize)]
struct DownloadEntry {
    link: String,
    download: String,
    #[serde(default)]
    generated: Option<DateTime<Utc>>,
}
