//! H.264 Annex-B decoding through OpenH264.

use super::{AnnexBSplitter, CodecFactory, Raster, VideoCodec};
use crate::error::CodecError;
use framebuf::PixelLayout;
use openh264::decoder::Decoder;
use std::sync::Arc;

pub struct OpenH264Codec {
    decoder: Decoder,
    splitter: AnnexBSplitter,
    units: Vec<Vec<u8>>,
    frames_decoded: u64,
}

impl OpenH264Codec {
    pub fn new() -> Result<Self, CodecError> {
        let decoder = Decoder::new().map_err(|e| CodecError::Init(format!("{:?}", e)))?;

        Ok(Self {
            decoder,
            splitter: AnnexBSplitter::new(),
            units: Vec::new(),
            frames_decoded: 0,
        })
    }

    /// Factory handing every session a fresh decoder.
    pub fn factory() -> Arc<dyn CodecFactory> {
        Arc::new(|| -> Result<Box<dyn VideoCodec>, CodecError> {
            Ok(Box::new(OpenH264Codec::new()?))
        })
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    fn decode_unit(&mut self, unit: &[u8], out: &mut Vec<Raster>) -> Result<(), CodecError> {
        let maybe_yuv = self
            .decoder
            .decode(unit)
            .map_err(|e| CodecError::Malformed(format!("{:?}", e)))?;

        if let Some(yuv) = maybe_yuv {
            let (width, height) = yuv.dimension_rgb();
            let mut pixels = vec![0u8; PixelLayout::Rgba8888.frame_len(width as u32, height as u32)];
            yuv.write_rgba8(&mut pixels);

            self.frames_decoded += 1;
            tracing::trace!(width, height, frames = self.frames_decoded, "Decoded picture");

            out.push(Raster {
                width: width as u32,
                height: height as u32,
                layout: PixelLayout::Rgba8888,
                pixels,
            });
        }
        Ok(())
    }
}

impl VideoCodec for OpenH264Codec {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Raster>) -> Result<(), CodecError> {
        self.splitter.push(bytes, &mut self.units);

        let mut first_error = None;
        for unit in std::mem::take(&mut self.units) {
            if let Err(e) = self.decode_unit(&unit, out) {
                tracing::debug!(error = %e, nal_len = unit.len(), "Skipping undecodable NAL unit");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn flush(&mut self, out: &mut Vec<Raster>) -> Result<(), CodecError> {
        // The last unit has no following start code to terminate it
        match self.splitter.flush() {
            Some(unit) => self.decode_unit(&unit, out),
            None => Ok(()),
        }
    }
}
