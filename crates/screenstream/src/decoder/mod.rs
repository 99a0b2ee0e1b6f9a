//! Turning transport bytes into tagged frames.

pub mod elementary;
pub mod framed;

use crate::banner::Banner;
use crate::codec::CodecFactory;
use crate::config::StreamConfig;
use crate::error::CaptureError;
use framebuf::Frame;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub use elementary::ElementaryStreamDecoder;
pub use framed::LengthPrefixedDecoder;

/// Resumable decoder fed with arbitrarily sized chunks.
pub trait FrameDecoder: Send {
    /// Consume `bytes`, pushing every completed frame into `out`.
    ///
    /// Returns how many units were dropped as undecodable. `Err` is reserved
    /// for violations that end the session.
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<Frame>) -> Result<usize, CaptureError>;

    /// Whether the stream handshake (if any) has completed.
    fn is_negotiated(&self) -> bool;

    /// Emit frames still held back when the stream segment ends. Returns the
    /// number of units dropped, like [`FrameDecoder::feed`].
    fn finish(&mut self, _out: &mut Vec<Frame>) -> usize {
        0
    }

    fn banner(&self) -> Option<Banner> {
        None
    }
}

/// Hands out strictly increasing frame sequences, starting at 1.
///
/// Clones share the counter, so sequences keep increasing across session
/// restarts.
#[derive(Debug, Clone, Default)]
pub struct Sequencer(Arc<AtomicU64>);

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Last sequence handed out, 0 if none.
    pub fn current(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Wire format of a source, fixed when the stream is built.
#[derive(Clone)]
pub enum DecoderKind {
    /// Banner, then 4-byte LE length prefixed payloads.
    LengthPrefixed,
    /// Continuous compressed video handed to a codec.
    Elementary(Arc<dyn CodecFactory>),
}

impl DecoderKind {
    /// Fresh decoder for one session cycle.
    pub fn build(
        &self,
        config: &StreamConfig,
        sequencer: Sequencer,
    ) -> Result<Box<dyn FrameDecoder>, CaptureError> {
        match self {
            DecoderKind::LengthPrefixed => {
                Ok(Box::new(LengthPrefixedDecoder::new(config, sequencer)))
            }
            DecoderKind::Elementary(factory) => {
                let codec = factory
                    .create()
                    .map_err(|e| CaptureError::Connect(e.to_string()))?;
                Ok(Box::new(ElementaryStreamDecoder::new(codec, sequencer)))
            }
        }
    }
}

impl fmt::Debug for DecoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecoderKind::LengthPrefixed => f.write_str("LengthPrefixed"),
            DecoderKind::Elementary(_) => f.write_str("Elementary"),
        }
    }
}
