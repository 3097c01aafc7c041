use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Host returned retryable status {status}")]
    TransientHost {
        status: u16,
        retry_after: Option<Duration>,
    },

    #[error("Upload rejected with status {status}: {reason}")]
    UploadRejected { status: u16, reason: String },

    #[error("Unexpected response from host: {0}")]
    InvalidResponse(String),

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("No uploader registered for host: {host}")]
    UnknownHost { host: String },

    #[error("No valid images to download")]
    NoDownloadableImages,

    #[error("None of the {attempted} images could be downloaded")]
    DownloadsExhausted { attempted: usize },

    #[error("Gallery error: {0}")]
    Gallery(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Custom result type
pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(field: &str, message: &str) -> Self {
        Self::Validation {
            field: field.to_string(),
            message: message.to_string(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::FileNotFound {
            path: path.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication(message.into())
    }

    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Rate limits, server errors and transport timeouts/connection failures.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::TransientHost { .. } => true,
            AppError::Network(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Errors that abort a whole backend call rather than a single item.
    pub fn is_job_level(&self) -> bool {
        matches!(
            self,
            AppError::Configuration(_) | AppError::Authentication(_) | AppError::UnknownHost { .. }
        )
    }

    /// Delay requested by the host itself, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::TransientHost { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Lock a mutex, logging instead of panicking when it was poisoned.
pub fn safe_lock<'a, T>(mutex: &'a Mutex<T>, operation: &str) -> Option<MutexGuard<'a, T>> {
    match mutex.lock() {
        Ok(guard) => Some(guard),
        Err(e) => {
            log::error!(
                "Failed to acquire lock for {} (non-critical): {}",
                operation,
                e
            );
            None
        }
    }
}
