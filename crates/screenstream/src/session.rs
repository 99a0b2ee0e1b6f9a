use crate::error::SessionFailure;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Lifecycle of a stream session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Streaming,
    Draining,
    Closed,
    Failed(SessionFailure),
}

impl SessionState {
    /// A producer is (or is about to be) running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Streaming | SessionState::Draining
        )
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            SessionState::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Streaming => f.write_str("streaming"),
            SessionState::Draining => f.write_str("draining"),
            SessionState::Closed => f.write_str("closed"),
            SessionState::Failed(failure) => write!(f, "failed ({})", failure),
        }
    }
}

/// Session state shared between the producer and lifecycle callers.
#[derive(Debug)]
pub(crate) struct SessionCell {
    state: Mutex<SessionState>,
    changed: Condvar,
}

impl SessionCell {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Disconnected),
            changed: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn get(&self) -> SessionState {
        self.lock().clone()
    }

    pub(crate) fn set(&self, next: SessionState) {
        let mut state = self.lock();
        if *state != next {
            tracing::debug!("Session {} -> {}", *state, next);
            *state = next;
            self.changed.notify_all();
        }
    }

    /// Move to `next` unless the session is already being torn down.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let mut state = self.lock();
        if matches!(*state, SessionState::Draining | SessionState::Closed) {
            return false;
        }
        if *state != next {
            tracing::debug!("Session {} -> {}", *state, next);
            *state = next;
            self.changed.notify_all();
        }
        true
    }

    /// Producer side of a restart: `Draining` becomes `Closed` once the
    /// transport is released.
    pub(crate) fn finish_drain(&self) {
        let mut state = self.lock();
        if *state == SessionState::Draining {
            tracing::debug!("Session {} -> {}", *state, SessionState::Closed);
            *state = SessionState::Closed;
            self.changed.notify_all();
        }
    }

    /// Leave a drained `Closed` state for the next connect. Refuses any
    /// other state.
    pub(crate) fn reopen(&self) -> bool {
        let mut state = self.lock();
        if *state != SessionState::Closed {
            return false;
        }
        tracing::debug!("Session {} -> {}", *state, SessionState::Connecting);
        *state = SessionState::Connecting;
        self.changed.notify_all();
        true
    }

    /// Block until the session has left `Connecting`.
    pub(crate) fn wait_settled(&self) -> SessionState {
        let state = self
            .changed
            .wait_while(self.lock(), |state| *state == SessionState::Connecting)
            .unwrap_or_else(PoisonError::into_inner);
        state.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_wait_settled_wakes_on_transition() {
        let cell = Arc::new(SessionCell::new());
        cell.set(SessionState::Connecting);

        let producer = {
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                cell.set(SessionState::Streaming);
            })
        };

        assert_eq!(cell.wait_settled(), SessionState::Streaming);
        producer.join().unwrap();
    }

    #[test]
    fn test_advance_does_not_revive_closing_session() {
        let cell = SessionCell::new();
        cell.set(SessionState::Draining);

        assert!(!cell.advance(SessionState::Streaming));
        assert_eq!(cell.get(), SessionState::Draining);

        cell.set(SessionState::Disconnected);
        assert!(cell.advance(SessionState::Connecting));
        assert!(cell.get().is_active());
    }

    #[test]
    fn test_display_includes_failure() {
        let state = SessionState::Failed(SessionFailure::new(FailureKind::Io, "broken pipe"));
        assert_eq!(state.to_string(), "failed (Io: broken pipe)");
        assert_eq!(state.failure().map(|f| f.kind), Some(FailureKind::Io));
    }

    #[test]
    fn test_restart_passes_through_draining_and_closed() {
        let cell = SessionCell::new();
        cell.set(SessionState::Streaming);

        // Nothing to reopen while streaming
        assert!(!cell.reopen());

        assert!(cell.advance(SessionState::Draining));
        assert_eq!(cell.get(), SessionState::Draining);

        cell.finish_drain();
        assert_eq!(cell.get(), SessionState::Closed);

        assert!(cell.reopen());
        assert_eq!(cell.get(), SessionState::Connecting);

        // Connecting is not a drain
        cell.finish_drain();
        assert_eq!(cell.get(), SessionState::Connecting);
    }
}
