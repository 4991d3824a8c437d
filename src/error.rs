use thiserror::Error;

/// Type alias for Result with CleanerError
pub type Result<T> = std::result::Result<T, CleanerError>;

/// Error types for the cleaning pipeline
#[derive(Error, Debug)]
pub enum CleanerError {
    /// Gmail API returned an error
    #[error("Gmail API error: {0}")]
    ApiError(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Rate limit exceeded. `retry_after` is the server's hint and is only
    /// reported; the backoff schedule decides the actual wait
    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimitExceeded { retry_after: u64 },

    /// A remote call did not complete within the request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Network-related error (connection issues, resets, etc.)
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server returned 5xx error
    #[error("Server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request (400)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Forbidden (403)
    #[error("Access forbidden: {0}")]
    Forbidden(String),

    /// Message payload did not have the expected shape
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Label lookup or creation failed
    #[error("Label error: {0}")]
    LabelError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Rule file could not be read or written
    #[error("Rule store error: {0}")]
    RuleStoreError(String),

    /// Operator interrupted the run
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl CleanerError {
    /// Errors that the backoff loop retries: rate-limit signals and timeouts
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            CleanerError::RateLimitExceeded { .. } | CleanerError::Timeout(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CleanerError::Cancelled(_))
    }
}

/// Parse the Retry-After header from an HTTP response
///
/// Accepts either delay-seconds ("120") or an HTTP-date. Missing, invalid or
/// past values fall back to 5 seconds.
fn parse_retry_after_header<B>(response: &hyper::Response<B>) -> u64 {
    const DEFAULT_RETRY_AFTER: u64 = 5;

    if let Some(retry_after_value) = response.headers().get("retry-after") {
        if let Ok(retry_after_str) = retry_after_value.to_str() {
            if let Ok(seconds) = retry_after_str.parse::<u64>() {
                return seconds;
            }

            if let Ok(http_date) = httpdate::parse_http_date(retry_after_str) {
                let now = std::time::SystemTime::now();
                if let Ok(duration) = http_date.duration_since(now) {
                    return duration.as_secs();
                }
            }
        }
    }

    DEFAULT_RETRY_AFTER
}

impl From<google_gmail1::Error> for CleanerError {
    fn from(error: google_gmail1::Error) -> Self {
        match error {
            google_gmail1::Error::Failure(ref response) => {
                let status = response.status();
                let status_code = status.as_u16();
                let message = format!(
                    "HTTP {}: {}",
                    status_code,
                    status.canonical_reason().unwrap_or("Unknown")
                );

                match status_code {
                    429 => {
                        let retry_after = parse_retry_after_header(response);
                        CleanerError::RateLimitExceeded { retry_after }
                    }
                    404 => CleanerError::NotFound("Resource not found".to_string()),
                    400 => CleanerError::BadRequest(message),
                    403 => CleanerError::Forbidden(message),
                    500..=599 => CleanerError::ServerError {
                        status: status_code,
                        message,
                    },
                    _ => CleanerError::ApiError(message),
                }
            }
            google_gmail1::Error::BadRequest(ref err) => {
                CleanerError::BadRequest(format!("{}", err))
            }
            google_gmail1::Error::HttpError(ref err) => {
                CleanerError::NetworkError(format!("Connection error: {}", err))
            }
            google_gmail1::Error::Io(err) => CleanerError::NetworkError(err.to_string()),
            _ => CleanerError::ApiError(error.to_string()),
        }
    }
}
