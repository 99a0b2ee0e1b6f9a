pub mod banner;
pub mod codec;
pub mod config;
pub mod decoder;
pub mod error;
mod metrics;
pub mod minicap;
pub mod screenrecord;
pub mod session;
pub mod stream;
pub mod supervisor;
pub mod transport;

pub use banner::{Banner, PayloadFormat, Quirks};
pub use common::Backoff;
pub use codec::{CodecFactory, Raster, VideoCodec};
pub use config::{AppConfig, SourceKind, StreamConfig};
pub use decoder::{DecoderKind, FrameDecoder, Sequencer};
pub use error::{CaptureError, CodecError, FailureKind, SessionFailure};
pub use framebuf::{Frame, PixelLayout};
pub use minicap::MinicapCommand;
pub use screenrecord::ScreenrecordCommand;
pub use session::SessionState;
pub use stream::{Frames, ScreenStream};
pub use supervisor::{StreamStats, StreamSupervisor};
pub use transport::{Connector, PipeConnector, ReadOutcome, TcpConnector, Transport};
