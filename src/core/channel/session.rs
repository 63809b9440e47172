//! Session state machine.
//!
//! Pure bookkeeping: no I/O, no callbacks. The channel owns one instance behind
//! a mutex and performs the transport calls and notifications each transition
//! asks for.
//!
//! ```text
//!            open
//!     Idle --------> Joining --join ok--> Joined
//!       ^               |                   |
//!       |   room error /|          lost /   |
//!       |   timeout     v          error    v
//!       |             Error <---------------+
//!       |               |                   |
//!       |         close |            close  |  (also from Joining)
//!       |               v                   v
//!       +---------- Closed <---------- LeaveRequested
//! ```
//!
//! The engine instance is tracked separately:
//! `Absent -> Active -> Finalizing -> Absent`. A new engine is only created
//! once the previous one reported finalize-complete.

use std::fmt;

use super::base::{ChannelError, ChannelResult};
use crate::core::transport::SessionHandle;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No session has been opened
    #[default]
    Idle,
    /// Join issued, acknowledgement pending
    Joining,
    /// In the room; audio may flow
    Joined,
    /// Close in progress
    LeaveRequested,
    /// Closed by the Application
    Closed,
    /// Failed; the Application must re-open
    Error,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Idle => write!(f, "idle"),
            SessionPhase::Joining => write!(f, "joining"),
            SessionPhase::Joined => write!(f, "joined"),
            SessionPhase::LeaveRequested => write!(f, "leave_requested"),
            SessionPhase::Closed => write!(f, "closed"),
            SessionPhase::Error => write!(f, "error"),
        }
    }
}

impl SessionPhase {
    /// Whether a session is joining or joined.
    pub fn is_active(&self) -> bool {
        matches!(self, SessionPhase::Joining | SessionPhase::Joined)
    }
}

/// Snapshot of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    /// Current lifecycle phase
    pub phase: SessionPhase,
    /// Peer that function replies are addressed to. Only set while joined.
    pub remote_user_id: Option<String>,
    /// Cause of the last failure
    pub last_error: Option<ChannelError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Absent,
    Active(SessionHandle),
    Finalizing(SessionHandle),
}

/// Work the caller must perform after a transition out of an active phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Teardown {
    /// Engine to leave and finalize
    pub handle: Option<SessionHandle>,
    /// Whether the closed notification is still owed for this cycle
    pub notify_closed: bool,
}

/// Session phase, remote peer and engine lifecycle.
#[derive(Debug)]
pub struct SessionStateMachine {
    state: SessionState,
    engine: EngineState,
    opened_notified: bool,
    closed_notified: bool,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SessionState::default(),
            engine: EngineState::Absent,
            opened_notified: false,
            closed_notified: false,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.phase
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.clone()
    }

    pub fn remote_peer(&self) -> Option<String> {
        self.state.remote_user_id.clone()
    }

    /// Joined with no unresolved error.
    pub fn is_open(&self) -> bool {
        self.state.phase == SessionPhase::Joined && self.state.last_error.is_none()
    }

    /// Fail with `NotConnected` unless joined.
    pub fn ensure_joined(&self) -> ChannelResult<()> {
        if self.state.phase == SessionPhase::Joined {
            Ok(())
        } else {
            Err(ChannelError::NotConnected)
        }
    }

    /// Engine instance that currently owns the session, if any.
    pub fn active_engine(&self) -> Option<SessionHandle> {
        match self.engine {
            EngineState::Active(handle) => Some(handle),
            _ => None,
        }
    }

    /// Whether an engine still exists, live or finalizing.
    pub fn holds_engine(&self) -> bool {
        self.engine != EngineState::Absent
    }

    /// Whether events tagged with `handle` belong to the live engine.
    pub fn is_current(&self, handle: SessionHandle) -> bool {
        self.engine == EngineState::Active(handle)
    }

    /// Start a new session: `Idle | Closed | Error -> Joining`.
    ///
    /// Allocates the handle for the engine about to be created.
    pub fn begin_open(&mut self) -> ChannelResult<SessionHandle> {
        match self.state.phase {
            SessionPhase::Joining | SessionPhase::Joined => {
                return Err(ChannelError::AlreadyJoined);
            }
            SessionPhase::LeaveRequested => {
                return Err(ChannelError::EngineUnavailable(
                    "previous session is still closing".to_string(),
                ));
            }
            SessionPhase::Idle | SessionPhase::Closed | SessionPhase::Error => {}
        }

        match self.engine {
            EngineState::Absent => {}
            EngineState::Active(handle) => {
                return Err(ChannelError::EngineUnavailable(format!(
                    "engine {} has not been torn down",
                    handle
                )));
            }
            EngineState::Finalizing(handle) => {
                return Err(ChannelError::EngineUnavailable(format!(
                    "engine {} is still finalizing",
                    handle
                )));
            }
        }

        let handle = SessionHandle::next();
        self.engine = EngineState::Active(handle);
        self.state = SessionState {
            phase: SessionPhase::Joining,
            remote_user_id: None,
            last_error: None,
        };
        self.opened_notified = false;
        self.closed_notified = false;
        Ok(handle)
    }

    /// Record a synchronous open failure. No closed notification is owed.
    pub fn open_failed(&mut self, handle: SessionHandle, error: ChannelError) {
        if self.engine == EngineState::Active(handle) {
            self.engine = EngineState::Absent;
        }
        self.state.phase = SessionPhase::Error;
        self.state.remote_user_id = None;
        self.state.last_error = Some(error);
        self.closed_notified = true;
    }

    /// `Active(handle) -> Finalizing(handle)`, called right before `fini`.
    pub fn finalize_engine(&mut self, handle: SessionHandle) {
        if self.engine == EngineState::Active(handle) {
            self.engine = EngineState::Finalizing(handle);
        }
    }

    /// Forget the engine without waiting for finalize-complete.
    pub fn release_engine(&mut self, handle: SessionHandle) {
        match self.engine {
            EngineState::Active(h) | EngineState::Finalizing(h) if h == handle => {
                self.engine = EngineState::Absent;
            }
            _ => {}
        }
    }

    /// Finalize-complete for `handle`. Returns whether the engine may now be destroyed.
    pub fn finalized(&mut self, handle: SessionHandle) -> bool {
        if self.engine == EngineState::Finalizing(handle) {
            self.engine = EngineState::Absent;
            true
        } else {
            false
        }
    }

    /// `Joining -> Joined`. Returns `true` the first time, when the opened
    /// notification is owed.
    pub fn join_succeeded(&mut self, handle: SessionHandle) -> bool {
        if !self.is_current(handle) || self.state.phase != SessionPhase::Joining {
            return false;
        }
        self.state.phase = SessionPhase::Joined;
        if self.opened_notified {
            return false;
        }
        self.opened_notified = true;
        true
    }

    /// Asynchronous failure: `Joining | Joined -> Error`.
    pub(crate) fn fail(&mut self, handle: SessionHandle, error: ChannelError) -> Option<Teardown> {
        if !self.is_current(handle) || !self.state.phase.is_active() {
            return None;
        }
        self.state.phase = SessionPhase::Error;
        self.state.remote_user_id = None;
        self.state.last_error = Some(error);
        Some(Teardown {
            handle: Some(handle),
            notify_closed: self.take_closed_notification(),
        })
    }

    /// Join deadline passed. Fails the session only if it is still joining.
    pub(crate) fn expire_join(
        &mut self,
        handle: SessionHandle,
        error: ChannelError,
    ) -> Option<Teardown> {
        if self.state.phase != SessionPhase::Joining {
            return None;
        }
        self.fail(handle, error)
    }

    /// Explicit close. Returns `None` when there is nothing to do.
    pub(crate) fn request_close(&mut self) -> Option<Teardown> {
        match self.state.phase {
            SessionPhase::Idle | SessionPhase::Closed | SessionPhase::LeaveRequested => None,
            SessionPhase::Error => {
                self.state.phase = SessionPhase::Closed;
                None
            }
            SessionPhase::Joining | SessionPhase::Joined => {
                self.state.phase = SessionPhase::LeaveRequested;
                self.state.remote_user_id = None;
                Some(Teardown {
                    handle: self.active_engine(),
                    notify_closed: self.take_closed_notification(),
                })
            }
        }
    }

    /// `LeaveRequested -> Closed`.
    pub fn close_completed(&mut self) {
        if self.state.phase == SessionPhase::LeaveRequested {
            self.state.phase = SessionPhase::Closed;
        }
    }

    /// Remote user entered. Ignored unless joined. Returns whether it was recorded.
    pub fn remote_joined(&mut self, handle: SessionHandle, user_id: &str) -> bool {
        if !self.is_current(handle) || self.state.phase != SessionPhase::Joined {
            return false;
        }
        if let Some(previous) = self.state.remote_user_id.as_deref() {
            if previous != user_id {
                tracing::warn!(
                    "Remote peer {} replaced by {} without an offline event",
                    previous,
                    user_id
                );
            }
        }
        self.state.remote_user_id = Some(user_id.to_string());
        true
    }

    /// Remote user left. Clears the peer only if it is the tracked one.
    pub fn remote_offline(&mut self, handle: SessionHandle, user_id: &str) -> bool {
        if !self.is_current(handle) || self.state.remote_user_id.as_deref() != Some(user_id) {
            return false;
        }
        self.state.remote_user_id = None;
        true
    }

    fn take_closed_notification(&mut self) -> bool {
        let owed = !self.closed_notified;
        self.closed_notified = true;
        owed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined() -> (SessionStateMachine, SessionHandle) {
        let mut sm = SessionStateMachine::new();
        let handle = sm.begin_open().unwrap();
        assert!(sm.join_succeeded(handle));
        (sm, handle)
    }

    #[test]
    fn test_open_join_close_cycle() {
        let mut sm = SessionStateMachine::new();
        assert_eq!(sm.phase(), SessionPhase::Idle);
        assert_eq!(sm.ensure_joined(), Err(ChannelError::NotConnected));

        let handle = sm.begin_open().unwrap();
        assert_eq!(sm.phase(), SessionPhase::Joining);
        assert!(!sm.is_open());

        assert!(sm.join_succeeded(handle));
        assert!(sm.is_open());
        assert!(!sm.join_succeeded(handle));

        let teardown = sm.request_close().unwrap();
        assert_eq!(teardown.handle, Some(handle));
        assert!(teardown.notify_closed);
        assert_eq!(sm.phase(), SessionPhase::LeaveRequested);

        sm.close_completed();
        assert_eq!(sm.phase(), SessionPhase::Closed);
        assert!(sm.request_close().is_none());
    }

    #[test]
    fn test_open_rejected_while_active() {
        let mut sm = SessionStateMachine::new();
        sm.begin_open().unwrap();
        assert_eq!(sm.begin_open(), Err(ChannelError::AlreadyJoined));

        let (mut sm, _) = joined();
        assert_eq!(sm.begin_open(), Err(ChannelError::AlreadyJoined));
    }

    #[test]
    fn test_reopen_waits_for_finalize_complete() {
        let (mut sm, handle) = joined();
        sm.request_close();
        sm.finalize_engine(handle);
        sm.close_completed();

        assert!(matches!(
            sm.begin_open(),
            Err(ChannelError::EngineUnavailable(_))
        ));

        assert!(sm.finalized(handle));
        assert!(!sm.finalized(handle));

        let next = sm.begin_open().unwrap();
        assert_ne!(next, handle);
        assert_eq!(sm.phase(), SessionPhase::Joining);
    }

    #[test]
    fn test_remote_peer_tracking() {
        let (mut sm, handle) = joined();

        assert!(sm.remote_joined(handle, "agent"));
        assert_eq!(sm.remote_peer().as_deref(), Some("agent"));

        assert!(!sm.remote_offline(handle, "someone-else"));
        assert_eq!(sm.remote_peer().as_deref(), Some("agent"));

        assert!(sm.remote_joined(handle, "agent-2"));
        assert_eq!(sm.remote_peer().as_deref(), Some("agent-2"));

        assert!(sm.remote_offline(handle, "agent-2"));
        assert_eq!(sm.remote_peer(), None);
    }

    #[test]
    fn test_remote_joined_ignored_while_joining() {
        let mut sm = SessionStateMachine::new();
        let handle = sm.begin_open().unwrap();
        assert!(!sm.remote_joined(handle, "agent"));
        assert_eq!(sm.remote_peer(), None);
    }

    #[test]
    fn test_failure_notifies_closed_once() {
        let (mut sm, handle) = joined();
        sm.remote_joined(handle, "agent");

        let teardown = sm
            .fail(handle, ChannelError::ConnectionLost("room".to_string()))
            .unwrap();
        assert!(teardown.notify_closed);
        assert_eq!(sm.phase(), SessionPhase::Error);
        assert_eq!(sm.remote_peer(), None);
        assert!(!sm.is_open());

        assert!(
            sm.fail(handle, ChannelError::ConnectionLost("room".to_string()))
                .is_none()
        );

        // Close after failure is a silent transition.
        assert!(sm.request_close().is_none());
        assert_eq!(sm.phase(), SessionPhase::Closed);
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let (mut sm, handle) = joined();
        sm.request_close();
        sm.finalize_engine(handle);
        sm.close_completed();
        sm.finalized(handle);

        let next = sm.begin_open().unwrap();
        assert!(!sm.join_succeeded(handle));
        assert!(sm.fail(handle, ChannelError::NotConnected).is_none());
        assert_eq!(sm.phase(), SessionPhase::Joining);
        assert!(sm.is_current(next));
    }

    #[test]
    fn test_join_deadline_only_while_joining() {
        let mut sm = SessionStateMachine::new();
        let handle = sm.begin_open().unwrap();
        let timeout = ChannelError::HandshakeTimeout(std::time::Duration::from_secs(10));

        let teardown = sm.expire_join(handle, timeout.clone()).unwrap();
        assert!(teardown.notify_closed);
        assert_eq!(sm.snapshot().last_error, Some(timeout.clone()));

        let (mut sm, handle) = joined();
        assert!(sm.expire_join(handle, timeout).is_none());
        assert_eq!(sm.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_open_failure_allows_retry() {
        let mut sm = SessionStateMachine::new();
        let handle = sm.begin_open().unwrap();
        sm.open_failed(handle, ChannelError::EngineUnavailable("oom".to_string()));

        assert_eq!(sm.phase(), SessionPhase::Error);
        assert!(sm.request_close().is_none());
        assert!(sm.begin_open().is_ok());
    }
}
