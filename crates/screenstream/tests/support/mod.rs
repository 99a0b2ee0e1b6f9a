#![allow(dead_code)]

use screenstream::banner::{Banner, PayloadFormat};
use screenstream::{
    CaptureError, CodecError, CodecFactory, Connector, PixelLayout, Raster, ReadOutcome,
    StreamConfig, Transport, VideoCodec,
};
use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// One scripted read result.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    Idle,
    /// Block inside the read for this long, then report idle.
    Wait(Duration),
    End,
    Fail(io::ErrorKind),
}

/// Counters shared with the test after the connector moves into a stream.
#[derive(Debug, Clone, Default)]
pub struct Usage {
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl Usage {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Connector replaying one script per session. Once a script runs out the
/// transport stays open and idle.
pub struct ScriptedConnector {
    sessions: Mutex<VecDeque<Vec<Step>>>,
    repeat: Option<Vec<Step>>,
    close_delay: Duration,
    usage: Usage,
}

impl ScriptedConnector {
    pub fn new(sessions: Vec<Vec<Step>>) -> (Self, Usage) {
        let usage = Usage::default();
        let connector = Self {
            sessions: Mutex::new(sessions.into()),
            repeat: None,
            close_delay: Duration::ZERO,
            usage: usage.clone(),
        };
        (connector, usage)
    }

    /// Every session replays the same script.
    pub fn repeating(script: Vec<Step>) -> (Self, Usage) {
        let (mut connector, usage) = Self::new(Vec::new());
        connector.repeat = Some(script);
        (connector, usage)
    }

    /// Every transport takes this long to release.
    pub fn with_close_delay(mut self, delay: Duration) -> Self {
        self.close_delay = delay;
        self
    }
}

impl Connector for ScriptedConnector {
    fn open(&self, _config: &StreamConfig) -> Result<Box<dyn Transport>, CaptureError> {
        let script = match &self.repeat {
            Some(script) => script.clone(),
            None => self
                .sessions
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CaptureError::Connect("connection refused".into()))?,
        };

        self.usage.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedTransport {
            steps: script.into(),
            usage: self.usage.clone(),
            close_delay: self.close_delay,
            closed: false,
        }))
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}

struct ScriptedTransport {
    steps: VecDeque<Step>,
    usage: Usage,
    close_delay: Duration,
    closed: bool,
}

impl Transport for ScriptedTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, CaptureError> {
        match self.steps.pop_front() {
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.steps.push_front(Step::Data(bytes.split_off(n)));
                }
                Ok(ReadOutcome::Data(n))
            }
            Some(Step::Wait(delay)) => {
                thread::sleep(delay);
                Ok(ReadOutcome::Idle)
            }
            Some(Step::End) => Ok(ReadOutcome::EndOfStream),
            Some(Step::Fail(kind)) => Err(io::Error::new(kind, "scripted failure").into()),
            Some(Step::Idle) | None => {
                thread::sleep(Duration::from_millis(2));
                Ok(ReadOutcome::Idle)
            }
        }
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            thread::sleep(self.close_delay);
            self.usage.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connector fed live by the test through a channel; dropping the sender
/// ends the stream.
pub struct ChannelConnector {
    rx: flume::Receiver<Vec<u8>>,
    usage: Usage,
}

impl ChannelConnector {
    pub fn new() -> (Self, flume::Sender<Vec<u8>>, Usage) {
        let (tx, rx) = flume::unbounded();
        let usage = Usage::default();
        let connector = Self {
            rx,
            usage: usage.clone(),
        };
        (connector, tx, usage)
    }
}

impl Connector for ChannelConnector {
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn Transport>, CaptureError> {
        self.usage.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ChannelTransport {
            rx: self.rx.clone(),
            read_timeout: config.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}

struct ChannelTransport {
    rx: flume::Receiver<Vec<u8>>,
    read_timeout: Duration,
}

impl Transport for ChannelTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, CaptureError> {
        match self.rx.recv_timeout(self.read_timeout) {
            Ok(bytes) => {
                assert!(bytes.len() <= buf.len(), "Test chunk larger than read buffer");
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(ReadOutcome::Data(bytes.len()))
            }
            Err(flume::RecvTimeoutError::Timeout) => Ok(ReadOutcome::Idle),
            Err(flume::RecvTimeoutError::Disconnected) => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn close(&mut self) {}
}

/// Turns every `F` byte into a 1x1 RGB raster and rejects `X`.
pub struct ByteCodec;

impl VideoCodec for ByteCodec {
    fn decode(&mut self, bytes: &[u8], out: &mut Vec<Raster>) -> Result<(), CodecError> {
        for &byte in bytes {
            match byte {
                b'F' => out.push(Raster {
                    width: 1,
                    height: 1,
                    layout: PixelLayout::Rgb888,
                    pixels: vec![0x10, 0x20, 0x30],
                }),
                b'X' => return Err(CodecError::Malformed("corrupt packet".into())),
                _ => {}
            }
        }
        Ok(())
    }
}

pub fn byte_codec() -> Arc<dyn CodecFactory> {
    Arc::new(|| -> Result<Box<dyn VideoCodec>, CodecError> { Ok(Box::new(ByteCodec)) })
}

pub fn test_config() -> StreamConfig {
    StreamConfig {
        buffer_capacity: 4,
        idle_interval: Duration::from_millis(1),
        read_timeout: Duration::from_millis(20),
        connect_timeout: Duration::from_millis(500),
        ..StreamConfig::default()
    }
}

pub fn rgba_banner() -> Vec<u8> {
    Banner::new(PayloadFormat::Rgba8888, 2, 2).encode().to_vec()
}

/// Length-prefixed unit for a 2x2 RGBA frame filled with `fill`.
pub fn rgba_unit(fill: u8) -> Vec<u8> {
    let mut bytes = 16u32.to_le_bytes().to_vec();
    bytes.extend_from_slice(&[fill; 16]);
    bytes
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
