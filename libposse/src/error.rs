//! Error types for posse

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PosseError>;

#[derive(Error, Debug)]
pub enum PosseError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl PosseError {
    /// Process exit code for a run that ended with this error.
    ///
    /// Every handled failure exits with 1; benign outcomes never reach here.
    pub fn exit_code(&self) -> i32 {
        1
    }

    /// Code printed in the `[<code>] <message>` status line
    pub fn status_code(&self) -> u16 {
        match self {
            PosseError::Platform(e) => e.status_code(),
            PosseError::Feed(_) => 422,
            PosseError::InvalidInput(_) => 400,
            PosseError::Config(_) | PosseError::Ledger(_) => 500,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum FeedError {
    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid feed document at {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Download of {url} failed: {message}")]
    Download { url: String, message: String },
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Media upload failed: {0}")]
    Media(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl PlatformError {
    pub fn status_code(&self) -> u16 {
        match self {
            PlatformError::Authentication(_) => 401,
            PlatformError::Validation(_) | PlatformError::Posting(_) | PlatformError::Media(_) => {
                422
            }
            PlatformError::RateLimit(_) => 429,
            PlatformError::Network(_) => 502,
            PlatformError::NotSupported(_) => 501,
        }
    }
}
