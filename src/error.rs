//! Error types for the audio transfer engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Server error: {0}")]
    Server(#[from] ServerError),
}

/// Stream lifecycle and transfer errors
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Failed to allocate transfer buffer")]
    AllocationFailure,

    #[error("Server rejected connect request: {0}")]
    ConnectFailure(String),

    #[error("Stream did not become ready within the readiness bound")]
    ReadinessTimeout,

    #[error("Server rejected a stream write: {0}")]
    WriteFailure(String),

    #[error("Invalid device index: {0}")]
    InvalidDevice(usize),

    #[error("Stream has neither an input nor an output configured")]
    NoStreamsConfigured,

    #[error("Stream must be stopped or aborted before close")]
    NotStopped,

    #[error("Stream is already started")]
    AlreadyStarted,

    #[error("Host buffer of {0} bytes exceeds the transfer buffer")]
    OversizedHostBuffer(usize),
}

/// Errors reported by the audio server session
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Connect refused: {0}")]
    ConnectRefused(String),

    #[error("Write rejected: {0}")]
    WriteRejected(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Stream is not connected")]
    NotConnected,
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;
