//! Error types for image generation.

use std::path::PathBuf;
use std::time::Duration;

/// Longest vendor error body kept in messages.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while generating images.
#[derive(Debug, thiserror::Error)]
pub enum ImgGenError {
    /// API key missing or invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Quota or rate limit exhausted (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters, caught before any remote call.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Provider name outside the supported set.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    /// Provider support was compiled out.
    #[error("provider not available: {0}")]
    ProviderNotAvailable(String),

    /// User input failed validation.
    #[error("{0}")]
    Validation(String),

    /// Output files from a previous run would be overwritten.
    #[error("file collision detected in {}: {}", .output_dir.display(), .files.join(", "))]
    Collision {
        output_dir: PathBuf,
        files: Vec<String>,
    },

    /// A reference image could not be read.
    #[error("Reference image not found: {}", .0.display())]
    ReferenceNotFound(PathBuf),

    /// The provider answered without any image payload.
    #[error("No image data in response")]
    NoImageData,

    /// Response did not have the expected shape.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration file problem.
    #[error("config error: {0}")]
    Config(String),
}

impl ImgGenError {
    /// Returns true if the remote signalled quota or rate exhaustion.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status == 429,
            Self::Network(e) => e.status().map(|s| s.as_u16()) == Some(429),
            _ => false,
        }
    }

    /// Returns the server-suggested wait, if one was sent.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for image generation operations.
pub type Result<T> = std::result::Result<T, ImgGenError>;

/// Reads a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Redacts key-looking tokens and truncates long vendor error bodies.
pub fn sanitize_error_message(text: &str) -> String {
    let redacted: Vec<String> = text
        .split(' ')
        .map(|word| {
            let bare =
                word.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != '_');
            if (bare.starts_with("sk-") || bare.starts_with("AIza")) && bare.len() > 12 {
                word.replace(bare, "[REDACTED]")
            } else {
                word.to_string()
            }
        })
        .collect();
    let joined = redacted.join(" ");
    let trimmed = joined.trim();

    if trimmed.chars().count() > MAX_ERROR_MESSAGE_LEN {
        let cut: String = trimmed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}
