use thiserror::Error;

/// All errors produced by vigil-core.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("client is already running")]
    AlreadyRunning,

    #[error("client is not running")]
    NotRunning,

    #[error("session actor is gone — event queue closed")]
    SessionGone,

    #[error("audio feed was already taken")]
    AudioFeedTaken,

    #[error("resampler error: {0}")]
    Resample(String),

    #[error("video encode error: {0}")]
    VideoEncode(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VigilError>;
