use thiserror::Error;

#[derive(Error, Debug)]
pub enum TandemError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not connected")]
    NotConnected,

    #[error("Session closed before a reply arrived")]
    SessionClosed,

    #[error("Unknown remote method: {0}")]
    UnknownMethod(String),

    #[error("No server address configured")]
    MissingAddress,
}

pub type Result<T> = std::result::Result<T, TandemError>;
