use thiserror::Error;

use crate::models::ItemRef;

/// Type alias for Result with GmailError
pub type Result<T> = std::result::Result<T, GmailError>;

/// Error taxonomy for mailbox queries and bulk mutations
#[derive(Error, Debug)]
pub enum GmailError {
    /// Credential invalid, expired or unrefreshable. Never retried.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded - should retry after specified seconds
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// Network-related error (connection issues, timeouts, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Input rejected locally before any request was issued
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    /// The provider no longer recognizes the targeted id (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Any other non-success provider response
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Provider payload did not have the expected shape
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// External cancellation observed between calls
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// The drain loop hit its round or time budget while candidates remained
    #[error("Drain budget exhausted after {rounds} rounds with candidates still matching")]
    DrainBudgetExceeded { rounds: u32 },

    /// Pagination stopped before exhaustion; `partial` holds every page fetched so far
    #[error("Listing failed after {} items: {source}", .partial.len())]
    FetchFailed {
        partial: Vec<ItemRef>,
        source: Box<GmailError>,
    },

    /// Mutation stopped part-way; `mutated` items were already changed and stay changed
    #[error("Mutation failed after {mutated} items: {source}")]
    MutationFailed {
        mutated: usize,
        source: Box<GmailError>,
    },
}

impl GmailError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GmailError::RateLimitExceeded { .. }
                | GmailError::ServerError { .. }
                | GmailError::NetworkError(_)
        )
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        GmailError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Innermost cause, looking through the partial-progress wrappers
    pub fn root_cause(&self) -> &GmailError {
        match self {
            GmailError::FetchFailed { source, .. } | GmailError::MutationFailed { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Map an HTTP status (and message) onto the taxonomy
    fn from_status(status_code: u16, message: String, retry_after: u64) -> Self {
        match status_code {
            401 => GmailError::AuthError(message),
            403 => GmailError::Forbidden(message),
            404 => GmailError::NotFound(message),
            400 => GmailError::BadRequest(message),
            429 => GmailError::RateLimitExceeded { retry_after },
            500..=599 => GmailError::ServerError {
                status: status_code,
                message,
            },
            _ => GmailError::ApiError(message),
        }
    }
}

const DEFAULT_RETRY_AFTER: u64 = 5;

/// Parse the Retry-After header from an HTTP response
///
/// The Retry-After header can be specified in two formats:
/// 1. Delay-seconds: An integer indicating seconds to wait (e.g., "120")
/// 2. HTTP-date: An HTTP date format (e.g., "Wed, 21 Oct 2015 07:28:00 GMT")
///
/// Returns the number of seconds to wait. If the header is missing or invalid,
/// returns a default of 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    let Some(value) = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
    else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.parse::<u64>() {
        return seconds;
    }

    if let Ok(http_date) = httpdate::parse_http_date(value) {
        if let Ok(duration) = http_date.duration_since(std::time::SystemTime::now()) {
            return duration.as_secs();
        }
    }

    DEFAULT_RETRY_AFTER
}

/// Classify a JSON error body of the form `{"error": {"code": 429, "message": "..."}}`
fn classify_error_body(body: &serde_json::Value) -> GmailError {
    let error = &body["error"];
    let message = error["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());

    match error["code"].as_u64() {
        Some(code) => GmailError::from_status(code as u16, message, DEFAULT_RETRY_AFTER),
        None => GmailError::BadRequest(message),
    }
}

impl From<google_gmail1::Error> for GmailError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let message = format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                );
                GmailError::from_status(
                    status.as_u16(),
                    message,
                    parse_retry_after_header(response),
                )
            }
            // The hub hands back the decoded JSON error body for non-success responses
            google_gmail1::Error::BadRequest(ref body) => classify_error_body(body),
            google_gmail1::Error::MissingToken(ref err) => {
                GmailError::AuthError(format!("Failed to obtain token: {}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                GmailError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => GmailError::NetworkError(err.to_string()),
            google_gmail1::Error::JsonDecodeError(ref body, ref err) => {
                GmailError::InvalidMessageFormat(format!("{} in response: {}", err, body))
            }
            google_gmail1::Error::Cancelled => {
                GmailError::OperationCancelled("request cancelled by delegate".to_string())
            }
            _ => GmailError::ApiError(error.to_string()),
        }
    }
}
