use crate::error::CaptureError;
use framebuf::PixelLayout;

/// Size of the banner fields we understand. Sources may declare a longer
/// banner; the extra bytes are skipped.
pub const BANNER_LEN: usize = 24;

/// Payload encoding announced by the banner's pixel format id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Rgba8888,
    Rgb888,
    Jpeg,
}

impl PayloadFormat {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            1 => Some(PayloadFormat::Rgba8888),
            2 => Some(PayloadFormat::Rgb888),
            3 => Some(PayloadFormat::Jpeg),
            _ => None,
        }
    }

    pub fn id(self) -> u32 {
        match self {
            PayloadFormat::Rgba8888 => 1,
            PayloadFormat::Rgb888 => 2,
            PayloadFormat::Jpeg => 3,
        }
    }

    /// Layout of raw payloads; `None` for compressed ones.
    pub fn raw_layout(self) -> Option<PixelLayout> {
        match self {
            PayloadFormat::Rgba8888 => Some(PixelLayout::Rgba8888),
            PayloadFormat::Rgb888 => Some(PixelLayout::Rgb888),
            PayloadFormat::Jpeg => None,
        }
    }
}

/// Quirk bits a source may advertise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Quirks(pub u8);

impl Quirks {
    /// Frames are only sent when the screen changes.
    pub const DUMB: u8 = 1;
    /// Frames are always upright regardless of orientation.
    pub const ALWAYS_UPRIGHT: u8 = 2;
    /// Frames may tear.
    pub const TEAR: u8 = 4;

    pub fn contains(self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

/// One-time handshake at the start of a framed stream (all integers LE):
///
/// ```text
/// 0  u8   version
/// 1  u8   banner length
/// 2  u32  pixel format id
/// 6  u32  real width
/// 10 u32  real height
/// 14 u32  virtual width
/// 18 u32  virtual height
/// 22 u8   orientation (quarter turns)
/// 23 u8   quirks
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Banner {
    pub version: u8,
    pub length: u8,
    pub format: PayloadFormat,
    pub real_width: u32,
    pub real_height: u32,
    pub virtual_width: u32,
    pub virtual_height: u32,
    /// Degrees: 0, 90, 180 or 270.
    pub orientation: u16,
    pub quirks: Quirks,
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

impl Banner {
    pub fn parse(bytes: &[u8]) -> Result<Self, CaptureError> {
        if bytes.len() < BANNER_LEN {
            return Err(CaptureError::Protocol(format!(
                "banner truncated at {} bytes",
                bytes.len()
            )));
        }

        let length = bytes[1];
        if (length as usize) < BANNER_LEN {
            return Err(CaptureError::Protocol(format!(
                "banner declares length {}, need at least {}",
                length, BANNER_LEN
            )));
        }

        let format_id = read_u32(bytes, 2);
        let format = PayloadFormat::from_id(format_id).ok_or_else(|| {
            CaptureError::Protocol(format!("unexpected pixel format id {}", format_id))
        })?;

        let orientation = bytes[22];
        if orientation > 3 {
            return Err(CaptureError::Protocol(format!(
                "orientation byte {} out of range",
                orientation
            )));
        }

        let banner = Self {
            version: bytes[0],
            length,
            format,
            real_width: read_u32(bytes, 6),
            real_height: read_u32(bytes, 10),
            virtual_width: read_u32(bytes, 14),
            virtual_height: read_u32(bytes, 18),
            orientation: orientation as u16 * 90,
            quirks: Quirks(bytes[23]),
        };

        if banner.real_width == 0
            || banner.real_height == 0
            || banner.virtual_width == 0
            || banner.virtual_height == 0
        {
            return Err(CaptureError::Protocol(format!(
                "non-positive dimensions: real {}x{}, virtual {}x{}",
                banner.real_width, banner.real_height, banner.virtual_width, banner.virtual_height
            )));
        }

        Ok(banner)
    }

    /// Serialize to the wire layout (length byte included as stored).
    pub fn encode(&self) -> [u8; BANNER_LEN] {
        let mut out = [0u8; BANNER_LEN];
        out[0] = self.version;
        out[1] = self.length;
        out[2..6].copy_from_slice(&self.format.id().to_le_bytes());
        out[6..10].copy_from_slice(&self.real_width.to_le_bytes());
        out[10..14].copy_from_slice(&self.real_height.to_le_bytes());
        out[14..18].copy_from_slice(&self.virtual_width.to_le_bytes());
        out[18..22].copy_from_slice(&self.virtual_height.to_le_bytes());
        out[22] = (self.orientation / 90) as u8;
        out[23] = self.quirks.0;
        out
    }

    /// Banner for a source sending `width` x `height` frames, real == virtual.
    pub fn new(format: PayloadFormat, width: u32, height: u32) -> Self {
        Self {
            version: 1,
            length: BANNER_LEN as u8,
            format,
            real_width: width,
            real_height: height,
            virtual_width: width,
            virtual_height: height,
            orientation: 0,
            quirks: Quirks::default(),
        }
    }

    /// Exact byte length of one raw frame, `None` for compressed payloads.
    pub fn raw_frame_len(&self) -> Option<usize> {
        self.format
            .raw_layout()
            .map(|layout| layout.frame_len(self.virtual_width, self.virtual_height))
    }
}
