use super::{Connector, ReadOutcome, Transport};
use crate::config::StreamConfig;
use crate::error::CaptureError;
use flume::{Receiver, RecvTimeoutError};
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Chunks the pump may queue ahead of the reader.
const PUMP_DEPTH: usize = 16;

/// How long `close` waits for the pump to see end of file before leaving it
/// behind.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Spawns a program and reads its stdout as the stream.
#[derive(Debug, Clone)]
pub struct PipeConnector {
    program: String,
    args: Vec<String>,
}

impl PipeConnector {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Connector for PipeConnector {
    fn open(&self, config: &StreamConfig) -> Result<Box<dyn Transport>, CaptureError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        // Own process group, so helpers forked by the source die with it
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);

        let mut child = command
            .spawn()
            .map_err(|e| CaptureError::Connect(format!("cannot spawn {}: {}", self.program, e)))?;

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(CaptureError::Connect(format!(
                "{} has no stdout pipe",
                self.program
            )));
        };

        let (tx, rx) = flume::bounded(PUMP_DEPTH);
        let chunk_size = config.chunk_size;

        let pump = thread::Builder::new()
            .name("screenstream-pipe".into())
            .spawn(move || pump(stdout, tx, chunk_size));

        let pump = match pump {
            Ok(handle) => handle,
            Err(e) => {
                reap(&mut child);
                return Err(CaptureError::Connect(format!("cannot start pipe reader: {}", e)));
            }
        };

        tracing::debug!(program = %self.program, pid = child.id(), "Spawned stream process");

        Ok(Box::new(PipeTransport {
            child: Some(child),
            rx: Some(rx),
            pump: Some(pump),
            pending: Vec::new(),
            pending_pos: 0,
            read_timeout: config.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        format!("pipe://{} {}", self.program, self.args.join(" "))
    }
}

fn pump(mut stdout: impl Read, tx: flume::Sender<io::Result<Vec<u8>>>, chunk_size: usize) {
    let mut buf = vec![0u8; chunk_size];

    loop {
        match stdout.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.send(Ok(buf[..n].to_vec())).is_err() {
                    // Reader hung up
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.send(Err(e));
                break;
            }
        }
    }
}

fn reap(child: &mut Child) {
    kill_group(child);
    // The process may already have exited
    let _ = child.kill();
    match child.wait() {
        Ok(status) => tracing::debug!(%status, "Stream process exited"),
        Err(e) => tracing::warn!(error = %e, "Failed to reap stream process"),
    }
}

#[cfg(unix)]
fn kill_group(child: &Child) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(pgid) = i32::try_from(child.id()) else {
        return;
    };
    // ESRCH once every member has exited
    if let Err(e) = killpg(Pid::from_raw(pgid), Signal::SIGKILL)
        && e != nix::errno::Errno::ESRCH
    {
        tracing::debug!(error = %e, pgid, "Failed to signal stream process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_child: &Child) {}

/// Join the pump if it finishes within `timeout`; otherwise detach it. A
/// detached pump exits on its next read once the pipe's writers are gone.
fn join_pump(pump: JoinHandle<()>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !pump.is_finished() {
        if Instant::now() >= deadline {
            tracing::warn!("Stream output still held open after kill, detaching pipe reader");
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }

    if pump.join().is_err() {
        tracing::warn!("Pipe reader thread panicked");
    }
}

pub struct PipeTransport {
    child: Option<Child>,
    rx: Option<Receiver<io::Result<Vec<u8>>>>,
    pump: Option<JoinHandle<()>>,
    /// Part of the last chunk that did not fit the caller's buffer.
    pending: Vec<u8>,
    pending_pos: usize,
    read_timeout: Duration,
}

impl PipeTransport {
    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = (self.pending.len() - self.pending_pos).min(buf.len());
        buf[..n].copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
        self.pending_pos += n;
        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        n
    }
}

impl Transport for PipeTransport {
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, CaptureError> {
        if self.pending_pos < self.pending.len() {
            return Ok(ReadOutcome::Data(self.drain_pending(buf)));
        }

        let Some(rx) = self.rx.as_ref() else {
            return Ok(ReadOutcome::EndOfStream);
        };

        match rx.recv_timeout(self.read_timeout) {
            Ok(Ok(chunk)) => {
                self.pending = chunk;
                self.pending_pos = 0;
                Ok(ReadOutcome::Data(self.drain_pending(buf)))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::Idle),
            Err(RecvTimeoutError::Disconnected) => Ok(ReadOutcome::EndOfStream),
        }
    }

    fn close(&mut self) {
        if let Some(mut child) = self.child.take() {
            reap(&mut child);
        }

        // Dropping the receiver unblocks a pump stuck on a full channel
        self.rx = None;

        if let Some(pump) = self.pump.take() {
            join_pump(pump, PUMP_JOIN_TIMEOUT);
        }

        self.pending.clear();
        self.pending_pos = 0;
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        self.close();
    }
}
