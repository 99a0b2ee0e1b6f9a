use super::{FrameDecoder, Sequencer};
use crate::banner::{BANNER_LEN, Banner, PayloadFormat};
use crate::config::StreamConfig;
use crate::error::CaptureError;
use bytes::Bytes;
use common::span_debug;
use framebuf::{Frame, PixelLayout};
use image::ImageFormat;

const HEADER_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Banner,
    Header,
    Payload(usize),
}

/// Decoder for banner-prefixed streams of 4-byte LE length framed payloads.
///
/// State survives across `feed` calls, so chunk boundaries may fall anywhere
/// inside the banner, a header or a payload.
pub struct LengthPrefixedDecoder {
    phase: Phase,
    pending: Vec<u8>,
    banner: Option<Banner>,
    target_size: Option<(u32, u32)>,
    max_payload_len: usize,
    sequencer: Sequencer,
}

impl LengthPrefixedDecoder {
    pub fn new(config: &StreamConfig, sequencer: Sequencer) -> Self {
        Self {
            phase: Phase::Banner,
            pending: Vec::with_capacity(config.chunk_size),
            banner: None,
            target_size: config.target_size,
            max_payload_len: config.max_payload_len,
            sequencer,
        }
    }

    fn negotiate(&mut self, banner: Banner) {
        tracing::info!(
            version = banner.version,
            format = ?banner.format,
            real = %format!("{}x{}", banner.real_width, banner.real_height),
            size = %format!("{}x{}", banner.virtual_width, banner.virtual_height),
            orientation = banner.orientation,
            quirks = banner.quirks.0,
            "Banner received"
        );

        if let Some((w, h)) = self.target_size
            && (w, h) != (banner.virtual_width, banner.virtual_height)
        {
            tracing::warn!(
                requested = %format!("{}x{}", w, h),
                actual = %format!("{}x{}", banner.virtual_width, banner.virtual_height),
                "Source ignored the requested size"
            );
        }

        self.banner = Some(banner);
    }

    fn decode_payload(&self, banner: &Banner, payload: &[u8]) -> Result<Frame, CaptureError> {
        match banner.format {
            PayloadFormat::Rgba8888 | PayloadFormat::Rgb888 => {
                let layout = banner.format.raw_layout().unwrap_or(PixelLayout::Rgb888);
                let expected = layout.frame_len(banner.virtual_width, banner.virtual_height);
                if payload.len() != expected {
                    return Err(CaptureError::Decode(format!(
                        "raw payload is {} bytes, expected {}",
                        payload.len(),
                        expected
                    )));
                }

                let frame = Frame::new(
                    self.sequencer.next(),
                    banner.virtual_width,
                    banner.virtual_height,
                    layout,
                    Bytes::copy_from_slice(payload),
                )?;
                Ok(frame)
            }
            PayloadFormat::Jpeg => {
                let _s = span_debug!("decode_jpeg");

                let rgb = image::load_from_memory_with_format(payload, ImageFormat::Jpeg)
                    .map_err(|e| CaptureError::Decode(e.to_string()))?
                    .to_rgb8();
                let (width, height) = rgb.dimensions();

                let frame = Frame::new(
                    self.sequencer.next(),
                    width,
                    height,
                    PixelLayout::Rgb888,
                    rgb.into_raw(),
                )?;
                Ok(frame)
            }
        }
    }
}

impl FrameDecoder for LengthPrefixedDecoder {
    fn feed(&mut self, bytes: &[u8], out: &mut Vec<Frame>) -> Result<usize, CaptureError> {
        self.pending.extend_from_slice(bytes);

        let mut pos = 0;
        let mut skipped = 0;

        loop {
            let available = self.pending.len() - pos;

            match self.phase {
                Phase::Banner => {
                    if available < 2 {
                        break;
                    }
                    let declared = (self.pending[pos + 1] as usize).max(BANNER_LEN);
                    if available < declared {
                        break;
                    }

                    let banner = Banner::parse(&self.pending[pos..pos + declared])?;
                    pos += declared;
                    self.negotiate(banner);
                    self.phase = Phase::Header;
                }
                Phase::Header => {
                    if available < HEADER_LEN {
                        break;
                    }
                    let len = u32::from_le_bytes([
                        self.pending[pos],
                        self.pending[pos + 1],
                        self.pending[pos + 2],
                        self.pending[pos + 3],
                    ]) as usize;
                    pos += HEADER_LEN;

                    if len > self.max_payload_len {
                        return Err(CaptureError::Protocol(format!(
                            "payload length {} exceeds limit {}",
                            len, self.max_payload_len
                        )));
                    }

                    if len == 0 {
                        tracing::trace!("Empty unit skipped");
                    } else {
                        self.phase = Phase::Payload(len);
                    }
                }
                Phase::Payload(len) => {
                    if available < len {
                        break;
                    }
                    let Some(banner) = self.banner else {
                        return Err(CaptureError::Protocol("payload before banner".into()));
                    };

                    match self.decode_payload(&banner, &self.pending[pos..pos + len]) {
                        Ok(frame) => out.push(frame),
                        Err(e) => {
                            tracing::warn!(error = %e, len, "Dropping undecodable payload");
                            skipped += 1;
                        }
                    }
                    pos += len;
                    self.phase = Phase::Header;
                }
            }
        }

        self.pending.drain(..pos);
        Ok(skipped)
    }

    fn is_negotiated(&self) -> bool {
        self.banner.is_some()
    }

    fn banner(&self) -> Option<Banner> {
        self.banner
    }
}
