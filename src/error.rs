/// Centralized error types for the sync service
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    // Provider Errors
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Provider rejected request: {0}")]
    MalformedRequest(String),

    #[error("Instrument not found at provider: {0}")]
    InstrumentNotFound(String),

    #[error("HTTP request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Deserialization failed: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Provider session error: {0}")]
    Session(String),

    // Store Errors
    #[error("Persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // System Errors
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Transient throttling worth waiting out with backoff
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SyncError::RateLimited(_))
    }

    /// Check if error aborts a whole run instead of a single fetch task
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::PersistenceConflict(_)
                | SyncError::Io(_)
                | SyncError::Config(_)
                | SyncError::Session(_)
                | SyncError::Internal(_)
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            SyncError::RateLimited(_) => "PROV_001",
            SyncError::MalformedRequest(_) => "PROV_002",
            SyncError::InstrumentNotFound(_) => "PROV_003",
            SyncError::Transport(_) => "NET_001",
            SyncError::Timeout(_) => "NET_002",
            SyncError::Deserialization(_) => "DATA_001",
            SyncError::Session(_) => "AUTH_001",
            SyncError::PersistenceConflict(_) => "STORE_001",
            SyncError::Io(_) => "STORE_002",
            SyncError::Config(_) => "CFG_001",
            SyncError::Internal(_) => "SYS_001",
        }
    }
}
