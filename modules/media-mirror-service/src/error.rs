//! Error types for the store, the Telegram resolver and configuration.

use thiserror::Error;

/// Media record store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("corrupt row for {file_id}: {reason}")]
    Corrupt { file_id: String, reason: String },

    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failure to turn a file id into a downloadable link.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("telegram request failed: {0}")]
    Request(#[from] teloxide::RequestError),

    #[error("invalid file url: {0}")]
    Url(#[from] url::ParseError),

    #[error("file {0} has no download path")]
    NoPath(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}
