//! Error types for the voice beacon

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decode process errors
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Audio source not found: {0}")]
    SourceMissing(String),

    #[error("Decode failed: {0}")]
    Failed(String),
}

/// Voice session and sink errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(u64),

    #[error("Channel {0} is not voice-capable")]
    NotVoice(u64),

    #[error("Join failed: {0}")]
    JoinFailed(String),

    #[error("Playback rejected: {0}")]
    PlaybackFailed(String),

    #[error("No session is subscribed to the sink")]
    NotSubscribed,

    #[error("State event stream closed")]
    EventsClosed,
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {var}: {value:?}")]
    InvalidVar { var: &'static str, value: String },
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;
