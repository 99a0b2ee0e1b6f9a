use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("No frame published within {0:?}")]
    Timeout(Duration),

    #[error("Stream closed")]
    Closed,

    #[error("Stream failed: {0}")]
    Failed(String),
}

impl BufferError {
    /// True for errors that end the session (as opposed to a caller retrying).
    pub fn is_terminal(&self) -> bool {
        matches!(self, BufferError::Closed | BufferError::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_formatting() {
        let err = BufferError::InvalidCapacity(0);
        assert_eq!(
            err.to_string(),
            "Invalid buffer capacity: 0",
            "InvalidCapacity should display the rejected capacity"
        );

        let err = BufferError::SizeMismatch {
            expected: 16,
            actual: 12,
        };
        assert_eq!(
            err.to_string(),
            "Pixel buffer size mismatch: expected 16 bytes, got 12",
            "SizeMismatch should display both sizes"
        );

        let err = BufferError::Timeout(Duration::from_millis(250));
        assert_eq!(
            err.to_string(),
            "No frame published within 250ms",
            "Timeout should display the waited duration"
        );

        let err = BufferError::Closed;
        assert_eq!(err.to_string(), "Stream closed");

        let err = BufferError::Failed("end of stream".to_string());
        assert_eq!(
            err.to_string(),
            "Stream failed: end of stream",
            "Failed should display the recorded reason"
        );
    }

    #[test]
    fn test_terminal_classification() {
        assert!(BufferError::Closed.is_terminal());
        assert!(BufferError::Failed("x".into()).is_terminal());
        assert!(!BufferError::Timeout(Duration::from_millis(1)).is_terminal());
        assert!(!BufferError::InvalidCapacity(0).is_terminal());
    }
}
