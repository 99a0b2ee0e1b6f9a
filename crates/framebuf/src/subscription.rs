use crate::errors::BufferError;
use crate::frame::Frame;
use crate::ring::{FrameBuffer, Ring, Status};
use std::sync::{Arc, MutexGuard};
use std::time::{Duration, Instant};

/// A consumer's view of the frames published after it was created.
///
/// Frames arrive in strictly increasing sequence order. A consumer slower
/// than the producer skips frames that were evicted before it got to them.
pub struct Subscription {
    buffer: Arc<FrameBuffer>,
    cursor: u64,
    epoch: u64,
    finished: bool,
}

enum Step {
    Frame(Frame),
    Failed(String),
    End,
    Pending,
}

impl Subscription {
    pub(crate) fn new(buffer: Arc<FrameBuffer>, cursor: u64, epoch: u64) -> Self {
        Self {
            buffer,
            cursor,
            epoch,
            finished: false,
        }
    }

    /// Sequence of the last frame handed out (or the start point).
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    fn step(&mut self, ring: &MutexGuard<'_, Ring>) -> Step {
        if ring.epoch != self.epoch {
            return Step::End;
        }

        if let Some(frame) = ring.first_after(self.cursor) {
            self.cursor = frame.sequence();
            return Step::Frame(frame.clone());
        }

        match &ring.status {
            Status::Open => Step::Pending,
            Status::Closed => Step::End,
            Status::Failed(reason) => Step::Failed(reason.clone()),
        }
    }

    fn finish(&mut self, step: Step) -> Option<Result<Frame, BufferError>> {
        match step {
            Step::Frame(frame) => Some(Ok(frame)),
            Step::Failed(reason) => {
                self.finished = true;
                Some(Err(BufferError::Failed(reason)))
            }
            Step::End | Step::Pending => {
                self.finished = true;
                None
            }
        }
    }

    /// Like `next()`, but gives up after `timeout` with `Err(Timeout)`.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<Frame, BufferError>> {
        if self.finished {
            return None;
        }

        let deadline = Instant::now() + timeout;
        let buffer = Arc::clone(&self.buffer);
        let mut ring = buffer.lock();

        loop {
            match self.step(&ring) {
                Step::Pending => {}
                step => return self.finish(step),
            }

            let now = Instant::now();
            if now >= deadline {
                return Some(Err(BufferError::Timeout(timeout)));
            }
            ring = buffer.wait_timeout(ring, deadline - now);
        }
    }
}

impl Iterator for Subscription {
    type Item = Result<Frame, BufferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let buffer = Arc::clone(&self.buffer);
        let mut ring = buffer.lock();

        loop {
            match self.step(&ring) {
                Step::Pending => ring = buffer.wait(ring),
                step => return self.finish(step),
            }
        }
    }
}
