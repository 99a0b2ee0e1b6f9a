//! Byte channels to a frame source.

pub mod pipe;
pub mod tcp;

use crate::config::StreamConfig;
use crate::error::CaptureError;

pub use pipe::PipeConnector;
pub use tcp::TcpConnector;

/// Result of a single bounded read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer.
    Data(usize),
    /// Nothing arrived within the read slice; the channel is still open.
    Idle,
    /// The peer closed the channel.
    EndOfStream,
}

/// An open channel. Implementations close on drop.
pub trait Transport: Send {
    /// Read whatever is available, waiting at most one read slice.
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, CaptureError>;

    /// Release the channel. Calling it twice is harmless.
    fn close(&mut self);
}

/// Opens a fresh transport for every session cycle.
pub trait Connector: Send + Sync {
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn Transport>, CaptureError>;

    /// Human-readable endpoint, used in logs and spans.
    fn describe(&self) -> String;
}
