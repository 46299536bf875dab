use thiserror::Error;

/// Failures raised while keeping the dashboard in sync with the backend.
///
/// None of these are fatal to a session: transport errors lead to a
/// reconnect, poll errors leave the previous state on screen and payload
/// errors skip a single message.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("push channel transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("push channel handshake timed out after {0:?}")]
    HandshakeTimeout(std::time::Duration),

    #[error("poll request failed: {0}")]
    Poll(#[from] reqwest::Error),

    #[error("malformed push payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T> = std::result::Result<T, SyncError>;
