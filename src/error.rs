use thiserror::Error;

/// Crate-wide error type.
///
/// Per the propagation policy: these surface out of a single connector or
/// a single REST call. Callers (REST Loader, Streaming Manager) log and
/// count them rather than propagate — see `EngineError::is_fatal`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("credentials error: {0}")]
    Credentials(String),
}

impl EngineError {
    /// Only configuration errors are fatal at startup (§7). Everything
    /// else is counted and the pipeline continues.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_))
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
