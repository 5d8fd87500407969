//! Error types shared by the search pipeline.

use thiserror::Error;

/// Errors that end a search or stop the program from starting one.
#[derive(Error, Debug)]
pub enum SearchError {
    /// The Telegram session is missing, revoked or expired.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Network or backend failure while reading history. Retry by searching again.
    #[error("message source unavailable: {0}")]
    SourceUnavailable(String),

    /// A search was started while another one is still running.
    #[error("a search is already running")]
    AlreadyRunning,

    #[error("chat not found: {0}")]
    ChatNotFound(String),

    #[error("invalid search: {0}")]
    InvalidQuery(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
}

impl SearchError {
    /// Whether the user has to log in again before the next search.
    pub fn requires_login(&self) -> bool {
        matches!(self, SearchError::Authentication(_))
    }
}

/// Problems with the startup configuration. Always fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Failure of a single classification request. Never aborts a search.
#[derive(Error, Debug)]
pub enum ClassificationError {
    #[error("classification timed out after {0} seconds")]
    Timeout(u64),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("classifier returned status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("could not understand classifier response: {0}")]
    Malformed(String),

    #[error("classifier backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;
