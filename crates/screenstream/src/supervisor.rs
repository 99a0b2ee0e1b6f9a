use crate::banner::Banner;
use crate::config::StreamConfig;
use crate::decoder::{DecoderKind, FrameDecoder, Sequencer};
use crate::error::{CaptureError, FailureKind, SessionFailure};
use crate::metrics::StreamMetrics;
use crate::session::{SessionCell, SessionState};
use crate::transport::{Connector, ReadOutcome, Transport};
use framebuf::{Frame, FrameBuffer};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep while waiting between reconnect attempts.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// A source that ends this close to the session time limit hit its own
/// recording cap, which started before our clock did.
const TIME_LIMIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub published: u64,
    pub evicted: u64,
    /// Units dropped as undecodable.
    pub skipped: u64,
    /// Session cycles started after the first one.
    pub restarts: u64,
}

/// How a session cycle ended without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleEnd {
    Stopped,
    TimeLimit,
}

/// State shared with the producer thread.
struct Shared {
    config: StreamConfig,
    connector: Box<dyn Connector>,
    decoder_kind: DecoderKind,
    buffer: Arc<FrameBuffer>,
    sequencer: Sequencer,
    session: SessionCell,
    banner: Mutex<Option<Banner>>,
    stop: AtomicBool,
    skipped: AtomicU64,
    restarts: AtomicU64,
    metrics: StreamMetrics,
}

impl Shared {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn banner_slot(&self) -> MutexGuard<'_, Option<Banner>> {
        self.banner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep up to `total`, waking early on shutdown. Returns `false` if
    /// shutdown was requested.
    fn pause(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stopping() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

/// Owns the single producer thread of a stream and its lifecycle.
pub struct StreamSupervisor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSupervisor {
    pub fn new(
        config: StreamConfig,
        connector: Box<dyn Connector>,
        decoder_kind: DecoderKind,
    ) -> Result<Self, CaptureError> {
        config.validate()?;
        let buffer = Arc::new(FrameBuffer::new(config.buffer_capacity)?);

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                connector,
                decoder_kind,
                buffer,
                sequencer: Sequencer::new(),
                session: SessionCell::new(),
                banner: Mutex::new(None),
                stop: AtomicBool::new(false),
                skipped: AtomicU64::new(0),
                restarts: AtomicU64::new(0),
                metrics: StreamMetrics::new("screenstream"),
            }),
            worker: Mutex::new(None),
        })
    }

    fn worker_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a session and wait until it streams or fails.
    ///
    /// No-op while a session is already running. After a failure or
    /// `close()`, starts a fresh session on an emptied buffer.
    pub fn start(&self) -> Result<(), CaptureError> {
        {
            let mut worker = self.worker_slot();

            // A live producer owns the session, including the brief Closed
            // between two time-limited cycles
            let running = worker.as_ref().is_some_and(|handle| !handle.is_finished());
            if running && self.shared.session.get().failure().is_none() {
                return Ok(());
            }

            if let Some(handle) = worker.take()
                && handle.join().is_err()
            {
                tracing::warn!("Previous producer thread panicked");
            }

            self.shared.stop.store(false, Ordering::Relaxed);
            *self.shared.banner_slot() = None;
            self.shared.buffer.reset();
            self.shared.session.set(SessionState::Connecting);

            let shared = Arc::clone(&self.shared);
            let handle = thread::Builder::new()
                .name("screenstream-producer".into())
                .spawn(move || produce(shared));

            match handle {
                Ok(handle) => *worker = Some(handle),
                Err(e) => {
                    let failure =
                        SessionFailure::new(FailureKind::Connect, format!("cannot spawn producer: {}", e));
                    fail(&self.shared, failure.clone());
                    return Err(CaptureError::SessionFailed(failure));
                }
            }
        }

        match self.shared.session.wait_settled() {
            SessionState::Streaming => Ok(()),
            SessionState::Failed(failure) => Err(CaptureError::SessionFailed(failure)),
            _ => Err(CaptureError::Closed),
        }
    }

    /// Stop the producer and release every blocked consumer. Idempotent.
    pub fn close(&self) {
        let mut worker = self.worker_slot();
        self.shared.stop.store(true, Ordering::Relaxed);

        if let Some(handle) = worker.take() {
            if self.shared.session.get().is_active() {
                self.shared.session.set(SessionState::Draining);
            }

            if handle.join().is_err() {
                tracing::warn!("Producer thread panicked");
            }
        }

        self.shared.buffer.close();
        if self.shared.session.get() != SessionState::Closed {
            self.shared.session.set(SessionState::Closed);
            tracing::info!(
                "Stream closed: {} frames published, {} skipped",
                self.shared.buffer.stats().published,
                self.shared.skipped.load(Ordering::Relaxed)
            );
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.session.get()
    }

    /// Closed by `close()`, as opposed to between two restart cycles.
    pub fn is_closed(&self) -> bool {
        self.shared.stopping() && self.shared.session.get() == SessionState::Closed
    }

    /// Banner of the current session, once negotiated.
    pub fn banner(&self) -> Option<Banner> {
        *self.shared.banner_slot()
    }

    pub fn buffer(&self) -> &Arc<FrameBuffer> {
        &self.shared.buffer
    }

    pub fn config(&self) -> &StreamConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> StreamStats {
        let buffer = self.shared.buffer.stats();
        StreamStats {
            published: buffer.published,
            evicted: buffer.evicted,
            skipped: self.shared.skipped.load(Ordering::Relaxed),
            restarts: self.shared.restarts.load(Ordering::Relaxed),
        }
    }
}

impl Drop for StreamSupervisor {
    fn drop(&mut self) {
        self.close();
    }
}

fn fail(shared: &Shared, failure: SessionFailure) {
    tracing::error!("Stream failed: {}", failure);
    shared.session.set(SessionState::Failed(failure.clone()));
    shared.buffer.fail(failure.to_string());
}

/// Producer thread body: runs session cycles until stopped or failed.
fn produce(shared: Arc<Shared>) {
    let span = tracing::info_span!("stream_session", source = %shared.connector.describe());
    let _enter = span.enter();

    let mut ever_streamed = false;
    let mut attempt = 0u32;

    loop {
        let mut streamed = false;
        let result = run_cycle(&shared, &mut streamed);
        ever_streamed |= streamed;
        if streamed {
            attempt = 0;
        }

        let err = match result {
            Ok(CycleEnd::Stopped) => break,
            Ok(CycleEnd::TimeLimit) => {
                if shared.stopping() || !shared.session.reopen() {
                    break;
                }
                tracing::info!("Session time limit reached, restarting");
                shared.restarts.fetch_add(1, Ordering::Relaxed);
                shared.metrics.restarts.add(1, &[]);
                continue;
            }
            Err(err) => err,
        };

        if shared.stopping() {
            break;
        }

        let failure = match err {
            CaptureError::SessionFailed(failure) => failure,
            other => SessionFailure::from_error(&other),
        };

        // The initial connection is never retried
        let backoff = shared.config.reconnect.filter(|_| ever_streamed);
        match backoff {
            Some(backoff) if backoff.allows(attempt) => {
                let delay = backoff.delay_for_attempt(attempt);
                attempt += 1;
                tracing::warn!(
                    "Session lost ({}), reconnecting in {:?} (attempt {}/{})",
                    failure,
                    delay,
                    attempt,
                    backoff.max_attempts
                );

                if !shared.session.advance(SessionState::Connecting) || !shared.pause(delay) {
                    break;
                }
                shared.restarts.fetch_add(1, Ordering::Relaxed);
                shared.metrics.restarts.add(1, &[]);
            }
            _ => {
                fail(&shared, failure);
                break;
            }
        }
    }

    tracing::debug!("Producer exited");
}

/// One connect-negotiate-stream cycle. The transport is released on every
/// exit path when it drops.
fn run_cycle(shared: &Shared, streamed: &mut bool) -> Result<CycleEnd, CaptureError> {
    let config = &shared.config;

    if !shared.session.advance(SessionState::Connecting) {
        return Ok(CycleEnd::Stopped);
    }

    // The source's own recording clock starts when it is launched
    let started = Instant::now();
    let mut transport = shared.connector.open(config)?;
    let mut decoder = shared
        .decoder_kind
        .build(config, shared.sequencer.clone())?;

    let mut buf = vec![0u8; config.chunk_size];
    let mut frames = Vec::new();

    let deadline = Instant::now() + config.connect_timeout;
    while !decoder.is_negotiated() {
        if shared.stopping() {
            return Ok(CycleEnd::Stopped);
        }
        if Instant::now() >= deadline {
            return Err(CaptureError::Connect(format!(
                "no handshake within {:?}",
                config.connect_timeout
            )));
        }
        if !step(shared, transport.as_mut(), decoder.as_mut(), &mut buf, &mut frames)? {
            return Err(end_of_stream("transport closed during handshake"));
        }
    }

    *shared.banner_slot() = decoder.banner();
    if !shared.session.advance(SessionState::Streaming) {
        return Ok(CycleEnd::Stopped);
    }
    *streamed = true;
    tracing::info!("Streaming from {}", shared.connector.describe());

    loop {
        if shared.stopping() {
            transport.close();
            return Ok(CycleEnd::Stopped);
        }
        if let Some(limit) = config.session_time_limit
            && started.elapsed() >= limit
        {
            return Ok(drain(shared, transport.as_mut(), decoder.as_mut(), &mut frames));
        }
        if !step(shared, transport.as_mut(), decoder.as_mut(), &mut buf, &mut frames)? {
            if let Some(limit) = config.session_time_limit
                && started.elapsed() + TIME_LIMIT_GRACE.min(limit / 4) >= limit
            {
                tracing::debug!(elapsed = ?started.elapsed(), "Source stopped at its time limit");
                return Ok(drain(shared, transport.as_mut(), decoder.as_mut(), &mut frames));
            }
            publish_remaining(shared, decoder.as_mut(), &mut frames);
            return Err(end_of_stream("transport closed by peer"));
        }
    }
}

/// End a time-limited cycle: Streaming -> Draining -> Closed, publishing
/// what the decoder still holds before the transport goes.
fn drain(
    shared: &Shared,
    transport: &mut dyn Transport,
    decoder: &mut dyn FrameDecoder,
    frames: &mut Vec<Frame>,
) -> CycleEnd {
    if !shared.session.advance(SessionState::Draining) {
        transport.close();
        return CycleEnd::Stopped;
    }

    publish_remaining(shared, decoder, frames);
    transport.close();
    shared.session.finish_drain();
    CycleEnd::TimeLimit
}

fn publish_remaining(shared: &Shared, decoder: &mut dyn FrameDecoder, frames: &mut Vec<Frame>) {
    let skipped = decoder.finish(frames);
    record_skipped(shared, skipped);
    publish(shared, frames);
}

fn record_skipped(shared: &Shared, skipped: usize) {
    if skipped > 0 {
        shared.skipped.fetch_add(skipped as u64, Ordering::Relaxed);
        shared.metrics.skipped.add(skipped as u64, &[]);
    }
}

fn publish(shared: &Shared, frames: &mut Vec<Frame>) {
    for frame in frames.drain(..) {
        if shared.buffer.publish(frame) {
            shared.metrics.frames.add(1, &[]);
        }
    }
}

fn end_of_stream(message: &str) -> CaptureError {
    CaptureError::SessionFailed(SessionFailure::new(FailureKind::EndOfStream, message))
}

/// One read, decode and publish round. Returns `false` at end of stream.
fn step(
    shared: &Shared,
    transport: &mut dyn Transport,
    decoder: &mut dyn FrameDecoder,
    buf: &mut [u8],
    frames: &mut Vec<Frame>,
) -> Result<bool, CaptureError> {
    match transport.read_chunk(buf)? {
        ReadOutcome::Data(n) => {
            shared.metrics.bytes.add(n as u64, &[]);

            let skipped = decoder.feed(&buf[..n], frames)?;
            record_skipped(shared, skipped);
            publish(shared, frames);
            Ok(true)
        }
        ReadOutcome::Idle => {
            thread::sleep(shared.config.idle_interval);
            Ok(true)
        }
        ReadOutcome::EndOfStream => Ok(false),
    }
}
