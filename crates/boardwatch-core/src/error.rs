use thiserror::Error;

/// Application-wide error types for Boardwatch.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (fetching a page or posting a notification).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// The fetcher refused a URL outside the allowed hosts.
    #[error("Host not allowed: {0}")]
    HostNotAllowed(String),

    /// A fetched document could not be interpreted (bad selector, bad next-page URL).
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Pagination ran past the configured page budget.
    #[error("Page limit of {0} exceeded")]
    PageLimitExceeded(usize),

    /// The run was cancelled or hit its deadline.
    #[error("Run cancelled")]
    Cancelled,

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A write collided with an existing external id.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Marking the catalog as tentatively removed failed; nothing was reconciled.
    #[error("Fence failed: {0}")]
    FenceError(String),

    /// A row expected to exist was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Delivering a notification failed.
    #[error("Notification error: {0}")]
    NotificationError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AppError {
    /// Returns true if this error ends a walk (and therefore the run's crawl phase).
    pub fn is_crawl_failure(&self) -> bool {
        matches!(
            self,
            AppError::HttpError(_)
                | AppError::NetworkError(_)
                | AppError::Timeout(_)
                | AppError::HostNotAllowed(_)
                | AppError::ParseError(_)
                | AppError::PageLimitExceeded(_)
                | AppError::Cancelled
        )
    }

    /// Returns true if this error is transient and a later run may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("HTTP 5")
                    || msg.contains("HTTP 429")
            }
            AppError::DatabaseError(msg) | AppError::FenceError(msg) => {
                msg.contains("timed out") || msg.contains("connection")
            }
            _ => false,
        }
    }
}
