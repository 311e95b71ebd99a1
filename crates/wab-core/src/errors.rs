use std::path::PathBuf;
use std::time::Duration;

/// Core error type for the bot.
///
/// Adapter crates (bridge, media) map their specific errors into this type so the
/// router and runner can handle failures consistently (user-facing reply vs retry).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
