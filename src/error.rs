use thiserror::Error;

/// Error kinds the sync provider core produces, per the error-handling
/// policy: protocol and cancellation errors terminate the originating
/// operation immediately, refresh-required terminates the persistent
/// search, and store/checkpoint failures are logged and otherwise
/// swallowed by their callers.
#[derive(Error, Debug)]
pub enum SyncProviderError {
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("refresh required")]
    RefreshRequired,

    #[error("no such object: {0}")]
    NoSuchObject(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, SyncProviderError>;
