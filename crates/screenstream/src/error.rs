use framebuf::BufferError;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// What ended a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Connect,
    Protocol,
    Io,
    EndOfStream,
}

/// Terminal failure recorded as the session's `Failed` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl SessionFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify a fatal error raised inside the production loop.
    pub fn from_error(err: &CaptureError) -> Self {
        let kind = match err {
            CaptureError::Connect(_) | CaptureError::Config(_) => FailureKind::Connect,
            CaptureError::Protocol(_) | CaptureError::Decode(_) => FailureKind::Protocol,
            CaptureError::SessionFailed(failure) => failure.kind,
            CaptureError::Io(_)
            | CaptureError::Timeout(_)
            | CaptureError::Closed => FailureKind::Io,
        };
        Self::new(kind, err.to_string())
    }
}

impl fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Connect error: {0}")]
    Connect(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No frame within {0:?}")]
    Timeout(Duration),

    #[error("Stream closed")]
    Closed,

    #[error("Session failed ({0})")]
    SessionFailed(SessionFailure),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CaptureError {
    /// Errors the caller may simply retry.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CaptureError::Timeout(_) | CaptureError::Decode(_))
    }
}

impl From<BufferError> for CaptureError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Timeout(waited) => CaptureError::Timeout(waited),
            BufferError::Closed => CaptureError::Closed,
            BufferError::Failed(reason) => {
                CaptureError::SessionFailed(SessionFailure::new(FailureKind::Io, reason))
            }
            BufferError::InvalidCapacity(capacity) => {
                CaptureError::Config(format!("buffer capacity {} out of range", capacity))
            }
            BufferError::SizeMismatch { expected, actual } => CaptureError::Decode(format!(
                "raster is {} bytes, expected {}",
                actual, expected
            )),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Codec initialization failed: {0}")]
    Init(String),

    #[error("Malformed media packet: {0}")]
    Malformed(String),
}
