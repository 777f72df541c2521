//! Shared state of the (single) download session.
//!
//! The worker task and the caller's thread both touch the session, so it
//! lives behind a mutex and every worker-side mutation is tagged with the
//! session generation: a late write from an aborted task of an older session
//! is ignored instead of clobbering the current one.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::download::error::DownloadError;
use crate::download::phase::Phase;
use crate::download::process::ProcessHandle;

/// Read-only view of the session for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSnapshot {
    pub is_downloading: bool,
    pub stop_requested: bool,
    pub phase: Phase,
    pub process_id: Option<u32>,
}

#[derive(Debug, Default)]
struct SessionState {
    is_downloading: bool,
    /// Cancelled on stop; replaced (never un-cancelled) when a new session begins
    stop: CancellationToken,
    phase: Phase,
    process: Option<ProcessHandle>,
    process_id: Option<u32>,
    active_task: Option<AbortHandle>,
    /// `stop()` took over the running session and emits its terminal events
    stop_claimed: bool,
    generation: u64,
}

/// Everything the stop path needs, taken out under one lock.
#[derive(Debug, Default)]
pub(crate) struct StopTargets {
    pub was_downloading: bool,
    pub process_id: Option<u32>,
    pub process: Option<ProcessHandle>,
    pub task: Option<AbortHandle>,
}

/// Who gets to emit the terminal events of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionExit {
    /// The worker ended the session; `stop_requested` is the flag at that moment
    Owned { stop_requested: bool },
    /// `stop()` (or an earlier cleanup) already ended it
    AlreadyEnded,
}

#[derive(Debug, Clone, Default)]
pub struct SharedSession {
    inner: Arc<Mutex<SessionState>>,
}

impl SharedSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.lock();
        SessionSnapshot {
            is_downloading: state.is_downloading,
            stop_requested: state.stop.is_cancelled(),
            phase: state.phase,
            process_id: state.process_id,
        }
    }

    pub fn is_downloading(&self) -> bool {
        self.lock().is_downloading
    }

    pub fn stop_requested(&self) -> bool {
        self.lock().stop.is_cancelled()
    }

    /// Moves an idle session to `Preparing`. Rejects with `Busy` (and
    /// changes nothing) if a session is running.
    pub(crate) fn begin(&self) -> Result<(u64, CancellationToken), DownloadError> {
        let mut state = self.lock();
        if state.is_downloading {
            return Err(DownloadError::Busy);
        }
        state.generation += 1;
        state.is_downloading = true;
        state.stop = CancellationToken::new();
        state.phase = Phase::Preparing;
        state.process = None;
        state.process_id = None;
        state.active_task = None;
        state.stop_claimed = false;
        Ok((state.generation, state.stop.clone()))
    }

    fn is_current(state: &SessionState, generation: u64) -> bool {
        state.generation == generation && state.is_downloading
    }

    pub(crate) fn set_task(&self, generation: u64, task: AbortHandle) {
        let mut state = self.lock();
        if Self::is_current(&state, generation) {
            state.active_task = Some(task);
        }
    }

    /// Phase updates stop as soon as a stop was requested.
    pub(crate) fn set_phase(&self, generation: u64, phase: Phase) {
        let mut state = self.lock();
        if Self::is_current(&state, generation) && !state.stop.is_cancelled() {
            state.phase = phase;
        }
    }

    pub(crate) fn attach_process(&self, generation: u64, handle: &ProcessHandle) {
        let mut state = self.lock();
        if Self::is_current(&state, generation) {
            state.process_id = handle.pid();
            state.process = Some(handle.clone());
        }
    }

    pub(crate) fn detach_process(&self, generation: u64) {
        let mut state = self.lock();
        if state.generation == generation {
            state.process = None;
            state.process_id = None;
        }
    }

    /// Sets the stop flag and hands out the process and task to tear down.
    pub(crate) fn request_stop(&self) -> StopTargets {
        let mut state = self.lock();
        state.stop.cancel();
        if state.is_downloading {
            state.stop_claimed = true;
        }
        StopTargets {
            was_downloading: state.is_downloading,
            process_id: state.process_id,
            process: state.process.clone(),
            task: state.active_task.take(),
        }
    }

    /// Back to idle after a stop. The stop flag stays set until the next `begin`.
    pub(crate) fn reset_after_stop(&self) {
        let mut state = self.lock();
        state.is_downloading = false;
        state.process = None;
        state.process_id = None;
        state.active_task = None;
    }

    /// End-of-session cleanup. Idempotent; a stale generation is a no-op.
    /// Returns true if this call moved the session to idle.
    pub(crate) fn finish(&self, generation: u64) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            return false;
        }
        let was_downloading = state.is_downloading;
        state.is_downloading = false;
        state.process = None;
        state.process_id = None;
        state.active_task = None;
        was_downloading
    }

    /// `finish` plus a read of the stop flag under the same lock. A session
    /// claimed by `stop()` is left alone; `stop()` resets and reports it.
    pub(crate) fn conclude(&self, generation: u64) -> SessionExit {
        let mut state = self.lock();
        if state.generation != generation || !state.is_downloading || state.stop_claimed {
            return SessionExit::AlreadyEnded;
        }
        state.is_downloading = false;
        state.process = None;
        state.process_id = None;
        state.active_task = None;
        SessionExit::Owned {
            stop_requested: state.stop.is_cancelled(),
        }
    }
}

/// Runs `finish` when the worker task ends, including when it is aborted.
pub(crate) struct SessionGuard {
    session: SharedSession,
    generation: u64,
}

impl SessionGuard {
    pub(crate) fn new(session: SharedSession, generation: u64) -> Self {
        Self { session, generation }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.session.finish(self.generation) {
            log::debug!("Session {} cleaned up", self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_begin_rejects_when_busy() {
        let session = SharedSession::new();
        let (generation, token) = session.begin().unwrap();
        assert_eq!(generation, 1);
        assert!(!token.is_cancelled());

        session.set_phase(generation, Phase::Video);
        let before = session.snapshot();
        assert!(matches!(session.begin(), Err(DownloadError::Busy)));
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn test_stop_flag_is_monotonic_until_next_session() {
        let session = SharedSession::new();
        let (generation, token) = session.begin().unwrap();
        let targets = session.request_stop();
        assert!(targets.was_downloading);
        assert!(token.is_cancelled());
        assert!(session.stop_requested());

        // Phase no longer moves once stop was requested
        session.set_phase(generation, Phase::Audio);
        assert_eq!(session.snapshot().phase, Phase::Preparing);

        session.reset_after_stop();
        assert!(session.stop_requested());
        assert!(!session.is_downloading());

        let (_, token) = session.begin().unwrap();
        assert!(!token.is_cancelled());
        assert!(!session.stop_requested());
    }

    #[test]
    fn test_finish_is_idempotent_and_generation_scoped() {
        let session = SharedSession::new();
        let (old, _) = session.begin().unwrap();
        assert!(session.finish(old));
        assert!(!session.finish(old));

        let (current, _) = session.begin().unwrap();
        // A late cleanup from the previous session must not end this one
        assert!(!session.finish(old));
        assert!(session.is_downloading());

        drop(SessionGuard::new(session.clone(), current));
        assert!(!session.is_downloading());
    }

    #[test]
    fn test_conclude_decides_terminal_owner_once() {
        let session = SharedSession::new();
        let (generation, token) = session.begin().unwrap();
        token.cancel();
        assert_eq!(session.conclude(generation), SessionExit::Owned { stop_requested: true });
        assert_eq!(session.conclude(generation), SessionExit::AlreadyEnded);

        // stop() claims the session even before it resets the flags
        let (generation, _) = session.begin().unwrap();
        session.request_stop();
        assert_eq!(session.conclude(generation), SessionExit::AlreadyEnded);
        assert!(session.is_downloading());
        session.reset_after_stop();
        assert_eq!(session.conclude(generation), SessionExit::AlreadyEnded);
    }

    #[test]
    fn test_stop_when_idle_is_harmless() {
        let session = SharedSession::new();
        let targets = session.request_stop();
        assert!(!targets.was_downloading);
        assert!(targets.process.is_none());
        session.reset_after_stop();
        assert_eq!(session.snapshot().process_id, None);
        assert!(session.begin().is_ok());
    }
}
