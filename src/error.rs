use axum::http::StatusCode;
use thiserror::Error;

/// Unified error type for debrid-dav.
#[derive(Error, Debug, Clone)]
pub enum DavError {
    /// Entity not found (maps to 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation rejected on a read-only tree (maps to 403)
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Operation timed out talking to a provider
    #[error("Operation timed out: {0}")]
    TimedOut(String),

    /// Network error - covers connection refused, DNS failures, resets
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Provider API returned an error with an HTTP status code
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    /// A resolved download URL no longer serves content
    #[error("Link unreachable: {0}")]
    LinkUnreachable(String),

    /// Torrent ended in a failed state on the provider
    #[error("Torrent failed: {0}")]
    TorrentFailed(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid argument (bad path, malformed range, bad magnet)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Validation error with messages
    #[error("Validation error: {}", .0.join("; "))]
    ValidationError(Vec<String>),

    /// Resource temporarily unavailable (repair queue full, pass busy)
    #[error("Resource temporarily unavailable: {0}")]
    NotReady(String),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Directory where a file was expected
    #[error("Is a directory")]
    IsDirectory,

    /// File where a directory was expected
    #[error("Not a directory")]
    NotDirectory,
}

impl DavError {
    /// Convert the error to an HTTP status suitable for WebDAV responses.
    pub fn status(&self) -> StatusCode {
        match self {
            DavError::NotFound(_) => StatusCode::NOT_FOUND,
            DavError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            DavError::TimedOut(_) => StatusCode::GATEWAY_TIMEOUT,
            DavError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            DavError::ApiError { status, .. } => match status {
                400 | 416 => StatusCode::BAD_REQUEST,
                401 | 403 => StatusCode::FORBIDDEN,
                404 => StatusCode::NOT_FOUND,
                408 | 423 | 429 | 503 | 504 => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::BAD_GATEWAY,
            },
            DavError::LinkUnreachable(_) => StatusCode::BAD_GATEWAY,
            DavError::TorrentFailed(_) => StatusCode::BAD_GATEWAY,
            DavError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            DavError::ValidationError(_) => StatusCode::BAD_REQUEST,
            DavError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            DavError::ParseError(_) => StatusCode::BAD_GATEWAY,
            DavError::IsDirectory => StatusCode::BAD_REQUEST,
            DavError::NotDirectory => StatusCode::CONFLICT,
        }
    }

    /// Check if this error is transient and retryable
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DavError::TimedOut(_)
                | DavError::NetworkError(_)
                | DavError::NotReady(_)
                | DavError::ApiError {
                    status: 408 | 429 | 502 | 503 | 504,
                    ..
                }
        )
    }

    /// Check if this error means the underlying content went away on the
    /// provider side and the owning torrent is a repair candidate.
    pub fn is_repair_candidate(&self) -> bool {
        matches!(
            self,
            DavError::LinkUnreachable(_)
                | DavError::ApiError {
                    status: 403 | 404 | 410,
                    ..
                }
        )
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for DavError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::NotFound => DavError::NotFound(e.to_string()),
    std::io::ErrorKind::PermissionDenied => DavError::PermissionDenied(e.to_string()),
    std::io::ErrorKind::TimedOut => DavError::TimedOut(e.to_string()),
    std::io::ErrorKind::InvalidInput => DavError::InvalidArgument(e.to_string()),
    _ => DavError::IoError(e.to_string()),
});

impl_from_error!(reqwest::Error, e => if e.is_timeout() {
    DavError::TimedOut(e.to_string())
} else if e.is_connect() {
    DavError::NetworkError(format!("Provider unreachable: {}", e))
} else if e.is_request() {
    DavError::NetworkError(e.to_string())
} else {
    DavError::IoError(format!("HTTP error: {}", e))
});

impl_from_error!(serde_json::Error, e => DavError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => DavError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with DavError.
pub type DavResult<T> = Result<T, DavError>;
