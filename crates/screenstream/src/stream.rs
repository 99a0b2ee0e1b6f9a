use crate::banner::Banner;
use crate::codec::CodecFactory;
use crate::config::StreamConfig;
use crate::decoder::DecoderKind;
use crate::error::{CaptureError, FailureKind, SessionFailure};
use crate::screenrecord::ScreenrecordCommand;
use crate::session::SessionState;
use crate::supervisor::{StreamStats, StreamSupervisor};
use crate::transport::{Connector, TcpConnector};
use framebuf::{BufferError, Frame, Subscription};
use std::sync::Arc;
use std::time::Duration;

/// Synchronous snapshot API over a background frame producer.
///
/// # Example
/// ```no_run
/// use screenstream::{ScreenStream, StreamConfig};
/// use std::time::Duration;
///
/// let stream = ScreenStream::minicap("127.0.0.1:37468", StreamConfig::default())?;
/// stream.start()?;
/// let frame = stream.latest(Duration::from_secs(1))?;
/// println!("{}x{} #{}", frame.width(), frame.height(), frame.sequence());
/// stream.close();
/// # Ok::<(), screenstream::CaptureError>(())
/// ```
pub struct ScreenStream {
    supervisor: StreamSupervisor,
}

impl ScreenStream {
    pub fn new(
        config: StreamConfig,
        connector: impl Connector + 'static,
        decoder_kind: DecoderKind,
    ) -> Result<Self, CaptureError> {
        Ok(Self {
            supervisor: StreamSupervisor::new(config, Box::new(connector), decoder_kind)?,
        })
    }

    /// Framed stream from a minicap-style socket.
    pub fn minicap(addr: impl Into<String>, config: StreamConfig) -> Result<Self, CaptureError> {
        Self::new(config, TcpConnector::new(addr), DecoderKind::LengthPrefixed)
    }

    /// H.264 stream from `adb exec-out screenrecord`, restarted before the
    /// device's recording limit.
    pub fn screenrecord(
        command: ScreenrecordCommand,
        codec_factory: Arc<dyn CodecFactory>,
        mut config: StreamConfig,
    ) -> Result<Self, CaptureError> {
        let command = command.configured(&config);
        config.session_time_limit = Some(command.effective_time_limit());

        Self::new(
            config,
            command.connector(),
            DecoderKind::Elementary(codec_factory),
        )
    }

    /// Connect and wait until the first session streams or fails.
    pub fn start(&self) -> Result<(), CaptureError> {
        self.supervisor.start()
    }

    /// Stop producing and release blocked readers. Safe from any thread.
    pub fn close(&self) {
        self.supervisor.close();
    }

    /// Most recent frame, waiting up to `timeout` if none arrived yet.
    pub fn latest(&self, timeout: Duration) -> Result<Frame, CaptureError> {
        if self.supervisor.is_closed() {
            return Err(CaptureError::Closed);
        }
        self.supervisor
            .buffer()
            .latest(timeout)
            .map_err(|e| self.map_buffer_error(e))
    }

    /// Frames published from now on, in order.
    pub fn subscribe(&self) -> Frames<'_> {
        Frames {
            stream: self,
            subscription: self.supervisor.buffer().subscribe(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.supervisor.state()
    }

    pub fn banner(&self) -> Option<Banner> {
        self.supervisor.banner()
    }

    pub fn stats(&self) -> StreamStats {
        self.supervisor.stats()
    }

    pub fn config(&self) -> &StreamConfig {
        self.supervisor.config()
    }

    fn map_buffer_error(&self, err: BufferError) -> CaptureError {
        match err {
            BufferError::Failed(reason) => CaptureError::SessionFailed(
                self.supervisor
                    .state()
                    .failure()
                    .cloned()
                    .unwrap_or_else(|| SessionFailure::new(FailureKind::Io, reason)),
            ),
            other => other.into(),
        }
    }
}

/// Iterator returned by [`ScreenStream::subscribe`].
///
/// Ends when the stream closes or restarts from `start()`; yields one
/// `Err(SessionFailed)` before ending if the session fails.
pub struct Frames<'a> {
    stream: &'a ScreenStream,
    subscription: Subscription,
}

impl Frames<'_> {
    /// Like `next()`, but gives up after `timeout` with `Err(Timeout)`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<Frame, CaptureError>> {
        self.subscription
            .next_timeout(timeout)
            .map(|item| item.map_err(|e| self.stream.map_buffer_error(e)))
    }
}

impl Iterator for Frames<'_> {
    type Item = Result<Frame, CaptureError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.subscription
            .next()
            .map(|item| item.map_err(|e| self.stream.map_buffer_error(e)))
    }
}
