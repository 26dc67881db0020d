use thiserror::Error;

/// Application-wide error types for Harvest.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed before a response was received.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Target answered with a non-success status code.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Request or browser session timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Browser could not be launched or driven.
    #[error("Browser error: {0}")]
    BrowserError(String),

    /// Job definition is malformed.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// URL points at a private or reserved address.
    #[error("SSRF blocked: {0}")]
    SsrfBlocked(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The job queue stayed full for the whole submit window.
    #[error("Job queue is full (waited {waited_ms}ms)")]
    QueueFull { waited_ms: u64 },

    /// The job queue was closed by shutdown.
    #[error("Job queue is closed")]
    QueueClosed,

    /// `start` was called on an orchestrator that is already running.
    #[error("Orchestrator already started")]
    AlreadyStarted,

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) | AppError::BrowserError(_) => true,
            AppError::HttpStatus { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            AppError::HttpError(msg) => {
                msg.contains("timeout") || msg.contains("connect") || msg.contains("reset")
            }
            _ => false,
        }
    }

    /// HTTP status carried by this error, if the target answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AppError::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
