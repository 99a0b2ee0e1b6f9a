use super::{FrameDecoder, Sequencer};
use crate::codec::{Raster, VideoCodec};
use crate::error::CaptureError;
use framebuf::Frame;

/// Decoder for elementary video streams: every byte goes to the codec and
/// every raster it completes becomes a frame.
pub struct ElementaryStreamDecoder {
    codec: Box<dyn VideoCodec>,
    rasters: Vec<Raster>,
    sequencer: Sequencer,
    negotiated: bool,
}

impl ElementaryStreamDecoder {
    pub fn new(codec: Box<dyn VideoCodec>, sequencer: Sequencer) -> Self {
        Self {
            codec,
            rasters: Vec::new(),
            sequencer,
            negotiated: false,
        }
    }
}

impl ElementaryStreamDecoder {
    /// Turn pending rasters into frames; returns how many were inconsistent.
    fn emit(&mut self, out: &mut Vec<Frame>) -> usize {
        let mut skipped = 0;
        for raster in self.rasters.drain(..) {
            let Raster {
                width,
                height,
                layout,
                pixels,
            } = raster;

            match Frame::new(self.sequencer.next(), width, height, layout, pixels) {
                Ok(frame) => out.push(frame),
                Err(e) => {
                    tracing::warn!(error = %e, width, height, "Codec produced an inconsistent raster");
                    skipped += 1;
                }
            }
        }
        skipped
    }
}

impl FrameDecoder for ElementaryStreamDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<Frame>) -> Result<usize, CaptureError> {
        // Elementary streams have no handshake; receiving data is enough.
        self.negotiated |= !bytes.is_empty();

        let mut skipped = 0;
        if let Err(e) = self.codec.decode(bytes, &mut self.rasters) {
            tracing::warn!(error = %e, "Codec rejected part of the stream");
            skipped += 1;
        }

        Ok(skipped + self.emit(out))
    }

    fn finish(&mut self, out: &mut Vec<Frame>) -> usize {
        let mut skipped = 0;
        if let Err(e) = self.codec.flush(&mut self.rasters) {
            tracing::warn!(error = %e, "Codec could not flush the end of the stream");
            skipped += 1;
        }
        skipped + self.emit(out)
    }

    fn is_negotiated(&self) -> bool {
        self.negotiated
    }
}
