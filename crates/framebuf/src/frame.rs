use crate::errors::BufferError;
use bytes::Bytes;
use std::fmt;
use std::time::{Duration, Instant};

/// Row-major pixel layouts a published frame can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelLayout {
    Rgba8888,
    Rgb888,
}

impl PixelLayout {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelLayout::Rgba8888 => 4,
            PixelLayout::Rgb888 => 3,
        }
    }

    /// Byte length of a tightly packed `width` x `height` raster.
    pub fn frame_len(self, width: u32, height: u32) -> usize {
        width as usize * height as usize * self.bytes_per_pixel()
    }
}

/// An immutable decoded raster.
///
/// Pixels live in a reference-counted [`Bytes`], so cloning a frame shares
/// the same read-only storage and never aliases anything the buffer mutates.
#[derive(Clone)]
pub struct Frame {
    sequence: u64,
    captured_at: Instant,
    width: u32,
    height: u32,
    layout: PixelLayout,
    pixels: Bytes,
}

impl Frame {
    pub fn new(
        sequence: u64,
        width: u32,
        height: u32,
        layout: PixelLayout,
        pixels: impl Into<Bytes>,
    ) -> Result<Self, BufferError> {
        let pixels = pixels.into();
        let expected = layout.frame_len(width, height);

        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(BufferError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        Ok(Self {
            sequence,
            captured_at: Instant::now(),
            width,
            height,
            layout,
            pixels,
        })
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    /// Time elapsed since the frame arrived.
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Cheap shared handle to the pixel storage.
    pub fn pixel_bytes(&self) -> Bytes {
        self.pixels.clone()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("layout", &self.layout)
            .field("len", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_len_per_layout() {
        assert_eq!(PixelLayout::Rgba8888.frame_len(2, 2), 16);
        assert_eq!(PixelLayout::Rgb888.frame_len(640, 480), 640 * 480 * 3);
    }

    #[test]
    fn test_new_frame_validates_pixel_length() {
        let frame = Frame::new(1, 2, 2, PixelLayout::Rgba8888, vec![0u8; 16]).unwrap();
        assert_eq!(frame.sequence(), 1);
        assert_eq!(frame.pixels().len(), 16);

        let err = Frame::new(1, 2, 2, PixelLayout::Rgba8888, vec![0u8; 12]).unwrap_err();
        assert_eq!(
            err,
            BufferError::SizeMismatch {
                expected: 16,
                actual: 12
            }
        );
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = Frame::new(1, 0, 4, PixelLayout::Rgb888, Vec::<u8>::new()).unwrap_err();
        assert!(matches!(err, BufferError::SizeMismatch { .. }));
    }

    #[test]
    fn test_clone_shares_pixel_storage() {
        let frame = Frame::new(7, 1, 1, PixelLayout::Rgb888, vec![1u8, 2, 3]).unwrap();
        let copy = frame.clone();

        assert_eq!(
            frame.pixels().as_ptr(),
            copy.pixels().as_ptr(),
            "Clones should share the same immutable storage"
        );
        assert_eq!(copy.sequence(), 7);
        assert_eq!(copy.pixel_bytes(), frame.pixel_bytes());
    }
}
