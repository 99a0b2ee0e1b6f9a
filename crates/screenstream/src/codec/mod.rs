//! Seam to the external video codec used by elementary streams.
//!
//! The stream layer only feeds raw bytes in and takes decoded rasters out;
//! bitstream parsing belongs to the codec.

pub mod annexb;
#[cfg(feature = "h264")]
pub mod h264;

use crate::error::CodecError;
use framebuf::PixelLayout;

pub use annexb::AnnexBSplitter;
#[cfg(feature = "h264")]
pub use h264::OpenH264Codec;

/// A decoded picture before it is tagged and published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
    pub pixels: Vec<u8>,
}

pub trait VideoCodec: Send {
    /// Feed the next bytes of the stream; push every picture completed by
    /// them into `out`.
    ///
    /// On `Err`, rasters decoded before the failing packet are still in `out`.
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Raster>) -> Result<(), CodecError>;

    /// Decode whatever is still buffered once the stream segment has ended.
    fn flush(&mut self, _out: &mut Vec<Raster>) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Creates a fresh codec for every session cycle.
pub trait CodecFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn VideoCodec>, CodecError>;
}

impl<F> CodecFactory for F
where
    F: Fn() -> Result<Box<dyn VideoCodec>, CodecError> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn VideoCodec>, CodecError> {
        self()
    }
}
