//! Error types for image editing.

use std::time::Duration;

/// Maximum length of an API error message kept in [`NanoEditError::Api`].
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while uploading images or running an edit.
#[derive(Debug, thiserror::Error)]
pub enum NanoEditError {
    /// API key missing or invalid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay suggested by the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Operation timed out.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Invalid request parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No image was supplied for an edit.
    #[error("Please upload at least one image.")]
    MissingImages,

    /// The instruction was empty or whitespace.
    #[error("Please enter an editing instruction.")]
    MissingInstruction,

    /// A file was not an image type the service accepts.
    #[error("{name} is not a supported image file")]
    UnsupportedFileType {
        /// File name (or caller-supplied label) of the rejected upload.
        name: String,
    },

    /// The model returned an empty candidate list.
    #[error("the model returned no candidates")]
    NoCandidates,

    /// The model answered without an image part.
    #[error("{}", no_image_message(.explanation))]
    NoImage {
        /// Text the model returned instead of an image, if any.
        explanation: Option<String>,
    },

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., reading an upload or saving the result).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn no_image_message(explanation: &Option<String>) -> String {
    match explanation {
        Some(text) => format!("the model did not return an image: {text}"),
        None => "the model did not return an image".to_string(),
    }
}

impl NanoEditError {
    /// Returns true if this error is likely transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Network(_)
        )
    }

    /// Returns the suggested retry delay, if available.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            Self::Timeout(_) => Some(Duration::from_secs(1)),
            Self::Network(_) => Some(Duration::from_secs(2)),
            _ => None,
        }
    }
}

/// Result type alias for image editing operations.
pub type Result<T> = std::result::Result<T, NanoEditError>;

/// Reduces an error response body to a short human-readable message.
///
/// Google APIs wrap errors as `{"error": {"message": ...}}`; when the body has
/// that shape only the message is kept. Whitespace is collapsed and the result
/// is truncated on a char boundary.
pub(crate) fn sanitize_error_message(body: &str) -> String {
    let extracted = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    let collapsed = extracted.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "empty response body".to_string();
    }
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    format!("{truncated}...")
}

/// Parses a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn test_is_retryable() {
        assert!(NanoEditError::RateLimited { retry_after: None }.is_retryable());
        assert!(NanoEditError::Timeout(Duration::from_secs(30)).is_retryable());

        assert!(!NanoEditError::Auth("bad key".into()).is_retryable());
        assert!(!NanoEditError::ContentBlocked("nsfw".into()).is_retryable());
        assert!(!NanoEditError::NoCandidates.is_retryable());
        assert!(!NanoEditError::MissingImages.is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let rate_limited = NanoEditError::RateLimited {
            retry_after: Some(Duration::from_secs(60)),
        };
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(60)));

        let timeout = NanoEditError::Timeout(Duration::from_secs(30));
        assert_eq!(timeout.retry_after(), Some(Duration::from_secs(1)));

        assert_eq!(NanoEditError::Auth("bad".into()).retry_after(), None);
    }

    #[test]
    fn test_error_display() {
        let err = NanoEditError::Api {
            status: 404,
            message: "Not found".into(),
        };
        assert_eq!(err.to_string(), "API error: 404 - Not found");

        assert_eq!(
            NanoEditError::MissingImages.to_string(),
            "Please upload at least one image."
        );
        assert_eq!(
            NanoEditError::UnsupportedFileType {
                name: "notes.txt".into()
            }
            .to_string(),
            "notes.txt is not a supported image file"
        );
    }

    #[test]
    fn test_no_image_display_includes_explanation() {
        let err = NanoEditError::NoImage {
            explanation: Some("I can't edit faces.".into()),
        };
        assert_eq!(
            err.to_string(),
            "the model did not return an image: I can't edit faces."
        );

        let err = NanoEditError::NoImage { explanation: None };
        assert_eq!(err.to_string(), "the model did not return an image");
    }

    #[test]
    fn test_sanitize_extracts_google_error_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid.\n Please pass a valid key.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            sanitize_error_message(body),
            "API key not valid. Please pass a valid key."
        );
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(2000);
        let msg = sanitize_error_message(&body);
        assert_eq!(msg.chars().count(), MAX_ERROR_MESSAGE_LEN + 3);
        assert!(msg.ends_with("..."));
        assert_eq!(sanitize_error_message("  "), "empty response body");
    }

    #[test]
    fn test_parse_retry_after() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("30"));
        assert_eq!(parse_retry_after(&headers), Some(30));

        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after(&headers), None);
    }
}
