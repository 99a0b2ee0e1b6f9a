use crate::errors::BufferError;
use crate::frame::Frame;
use crate::subscription::Subscription;
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const MAX_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Status {
    Open,
    Closed,
    Failed(String),
}

pub(crate) struct Ring {
    pub(crate) frames: VecDeque<Frame>,
    pub(crate) status: Status,
    /// Sequence of the most recently accepted frame, 0 before the first publish.
    pub(crate) last_sequence: u64,
    /// Bumped by `reset()` so subscriptions from a previous session end.
    pub(crate) epoch: u64,
    stats: BufferStats,
}

impl Ring {
    pub(crate) fn first_after(&self, sequence: u64) -> Option<&Frame> {
        self.frames.iter().find(|f| f.sequence() > sequence)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub published: u64,
    pub evicted: u64,
    pub rejected: u64,
}

/// Fixed-capacity, overwrite-oldest frame store shared by one producer and
/// any number of consumers.
///
/// The lock only guards the slot swap; pixel data is never copied under it.
pub struct FrameBuffer {
    capacity: usize,
    ring: Mutex<Ring>,
    changed: Condvar,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 || capacity > MAX_CAPACITY {
            return Err(BufferError::InvalidCapacity(capacity));
        }

        Ok(Self {
            capacity,
            ring: Mutex::new(Ring {
                frames: VecDeque::with_capacity(capacity),
                status: Status::Open,
                last_sequence: 0,
                epoch: 0,
                stats: BufferStats::default(),
            }),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Ring> {
        self.ring.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait<'a>(&self, guard: MutexGuard<'a, Ring>) -> MutexGuard<'a, Ring> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn wait_timeout<'a>(
        &self,
        guard: MutexGuard<'a, Ring>,
        timeout: Duration,
    ) -> MutexGuard<'a, Ring> {
        self.changed
            .wait_timeout(guard, timeout)
            .map(|(guard, _)| guard)
            .unwrap_or_else(|poisoned| poisoned.into_inner().0)
    }

    /// Insert a frame, evicting the oldest when full. Never blocks on readers.
    ///
    /// Returns false when the frame was rejected: its sequence does not
    /// advance past the last published one, or the buffer is closed/failed.
    pub fn publish(&self, frame: Frame) -> bool {
        let mut ring = self.lock();

        if ring.status != Status::Open {
            ring.stats.rejected += 1;
            tracing::debug!(
                sequence = frame.sequence(),
                "Dropping frame published after end of session"
            );
            return false;
        }

        if frame.sequence() <= ring.last_sequence {
            ring.stats.rejected += 1;
            tracing::warn!(
                sequence = frame.sequence(),
                last = ring.last_sequence,
                "Dropping out-of-order frame"
            );
            return false;
        }

        if ring.frames.len() == self.capacity {
            ring.frames.pop_front();
            ring.stats.evicted += 1;
        }

        ring.last_sequence = frame.sequence();
        ring.frames.push_back(frame);
        ring.stats.published += 1;
        drop(ring);

        self.changed.notify_all();
        true
    }

    /// Most recent frame, waiting up to `timeout` only if none was ever
    /// published in this session. A stale frame is returned immediately.
    pub fn latest(&self, timeout: Duration) -> Result<Frame, BufferError> {
        let deadline = Instant::now() + timeout;
        let mut ring = self.lock();

        loop {
            match &ring.status {
                Status::Failed(reason) => return Err(BufferError::Failed(reason.clone())),
                Status::Closed => return Err(BufferError::Closed),
                Status::Open => {}
            }

            if let Some(frame) = ring.frames.back() {
                return Ok(frame.clone());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(BufferError::Timeout(timeout));
            }
            ring = self.wait_timeout(ring, deadline - now);
        }
    }

    /// Non-blocking peek at the newest frame.
    pub fn try_latest(&self) -> Option<Frame> {
        self.lock().frames.back().cloned()
    }

    /// Frames currently held, oldest first.
    pub fn snapshot(&self) -> Vec<Frame> {
        self.lock().frames.iter().cloned().collect()
    }

    /// Live sequence of frames published after this call.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (cursor, epoch) = {
            let ring = self.lock();
            (ring.last_sequence, ring.epoch)
        };
        Subscription::new(Arc::clone(self), cursor, epoch)
    }

    /// End the session normally; blocked consumers are released.
    pub fn close(&self) {
        self.set_status(Status::Closed);
    }

    /// End the session with a failure every consumer will observe.
    pub fn fail(&self, reason: impl Into<String>) {
        self.set_status(Status::Failed(reason.into()));
    }

    /// Start a fresh session: drop held frames and reopen for publishing.
    ///
    /// The sequence high-water mark is kept so sequences stay increasing.
    pub fn reset(&self) {
        let mut ring = self.lock();
        ring.frames.clear();
        ring.status = Status::Open;
        ring.epoch += 1;
        drop(ring);
        self.changed.notify_all();
    }

    fn set_status(&self, status: Status) {
        let mut ring = self.lock();
        // The first terminal status wins.
        if ring.status == Status::Open {
            ring.status = status;
        }
        drop(ring);
        self.changed.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.lock().status == Status::Open
    }

    pub fn len(&self) -> usize {
        self.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last_sequence(&self) -> u64 {
        self.lock().last_sequence
    }

    pub fn stats(&self) -> BufferStats {
        self.lock().stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelLayout;
    use std::thread;

    fn frame(sequence: u64) -> Frame {
        Frame::new(sequence, 2, 2, PixelLayout::Rgba8888, vec![sequence as u8; 16]).unwrap()
    }

    #[test]
    fn test_capacity_bounds() {
        assert_eq!(
            FrameBuffer::new(0).err(),
            Some(BufferError::InvalidCapacity(0))
        );
        assert_eq!(
            FrameBuffer::new(MAX_CAPACITY + 1).err(),
            Some(BufferError::InvalidCapacity(MAX_CAPACITY + 1))
        );
        assert_eq!(FrameBuffer::new(1).unwrap().capacity(), 1);
    }

    #[test]
    fn test_publish_evicts_oldest_when_full() {
        let buffer = FrameBuffer::new(3).unwrap();

        for seq in 1..=5 {
            assert!(buffer.publish(frame(seq)));
        }

        let held: Vec<u64> = buffer.snapshot().iter().map(Frame::sequence).collect();
        assert_eq!(held, vec![3, 4, 5], "Buffer should hold the last 3 frames");

        let stats = buffer.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.evicted, 2);
    }

    #[test]
    fn test_latest_returns_highest_sequence() {
        let buffer = FrameBuffer::new(2).unwrap();
        assert!(buffer.try_latest().is_none());

        for seq in 1..=4 {
            buffer.publish(frame(seq));
            assert_eq!(buffer.latest(Duration::ZERO).unwrap().sequence(), seq);
            assert_eq!(buffer.try_latest().map(|f| f.sequence()), Some(seq));
        }
    }

    #[test]
    fn test_out_of_order_frame_rejected() {
        let buffer = FrameBuffer::new(4).unwrap();
        assert!(buffer.publish(frame(5)));
        assert!(!buffer.publish(frame(5)), "Duplicate sequence must be rejected");
        assert!(!buffer.publish(frame(3)), "Older sequence must be rejected");

        assert_eq!(buffer.len(), 1);
        assert_eq!(buffer.stats().rejected, 2);
    }

    #[test]
    fn test_latest_times_out_without_frames() {
        let buffer = FrameBuffer::new(1).unwrap();
        let timeout = Duration::from_millis(50);

        let started = Instant::now();
        let err = buffer.latest(timeout).unwrap_err();
        let waited = started.elapsed();

        assert_eq!(err, BufferError::Timeout(timeout));
        assert!(waited >= timeout, "Should not return before the timeout");
        assert!(
            waited < timeout + Duration::from_millis(500),
            "Should return shortly after the timeout (waited {:?})",
            waited
        );
    }

    #[test]
    fn test_latest_wakes_on_publish() {
        let buffer = Arc::new(FrameBuffer::new(1).unwrap());

        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                buffer.publish(frame(1));
            })
        };

        let got = buffer.latest(Duration::from_secs(5)).unwrap();
        assert_eq!(got.sequence(), 1);
        producer.join().unwrap();
    }

    #[test]
    fn test_close_releases_blocked_reader() {
        let buffer = Arc::new(FrameBuffer::new(1).unwrap());

        let reader = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || buffer.latest(Duration::from_secs(30)))
        };

        thread::sleep(Duration::from_millis(30));
        buffer.close();

        assert_eq!(reader.join().unwrap().unwrap_err(), BufferError::Closed);
    }

    #[test]
    fn test_failure_is_sticky_until_reset() {
        let buffer = FrameBuffer::new(2).unwrap();
        buffer.publish(frame(1));
        buffer.fail("broken pipe");
        buffer.close();

        assert_eq!(
            buffer.latest(Duration::ZERO).unwrap_err(),
            BufferError::Failed("broken pipe".into()),
            "First terminal status should win"
        );
        assert!(!buffer.publish(frame(2)));

        buffer.reset();
        assert!(buffer.is_open());
        assert!(buffer.is_empty(), "Reset should drop frames of the old session");
        assert!(!buffer.publish(frame(1)), "Sequences must keep increasing after reset");
        assert!(buffer.publish(frame(2)));
    }
}
