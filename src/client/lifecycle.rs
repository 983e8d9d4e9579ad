//! Session connection lifecycle.
//!
//! Owns the connection state for one session. Every transition passes
//! through this type; no other component mutates the state, which keeps the
//! observable transition sequence single-valued even though transport
//! events arrive from another concurrency domain.

use parking_lot::Mutex;

use crate::error::{Result, SessionError};

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl SessionStatus {
    pub fn name(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
        }
    }
}

/// The session state machine.
#[derive(Debug, Default)]
pub struct Lifecycle {
    status: Mutex<SessionStatus>,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Disconnected -> Connecting. Connecting from any other state is a
    /// caller error, not a queued retry.
    pub fn begin_connect(&self) -> Result<()> {
        let mut status = self.status.lock();
        if *status != SessionStatus::Disconnected {
            return Err(SessionError::ConnectFailure(format!(
                "connect attempted while {}",
                status.name()
            )));
        }
        *status = SessionStatus::Connecting;
        Ok(())
    }

    /// Connecting -> Connected, once the transport confirmed the handshake.
    pub fn complete_connect(&self) {
        *self.status.lock() = SessionStatus::Connected;
    }

    /// Connecting -> Disconnected after a failed handshake.
    pub fn fail_connect(&self) {
        *self.status.lock() = SessionStatus::Disconnected;
    }

    /// Connecting|Connected -> Disconnecting. Returns false when the
    /// session is already down or already tearing down, which makes `end`
    /// idempotent.
    pub fn begin_disconnect(&self) -> bool {
        let mut status = self.status.lock();
        match *status {
            SessionStatus::Connecting | SessionStatus::Connected => {
                *status = SessionStatus::Disconnecting;
                true
            }
            SessionStatus::Disconnected | SessionStatus::Disconnecting => false,
        }
    }

    /// Disconnecting -> Disconnected, once the transport confirmed teardown.
    pub fn complete_disconnect(&self) {
        *self.status.lock() = SessionStatus::Disconnected;
    }

    /// Error teardown from any state. Returns true when a live session was
    /// actually torn down, so the caller fires the end notification exactly
    /// once.
    pub fn force_disconnect(&self) -> bool {
        let mut status = self.status.lock();
        let was_live = *status != SessionStatus::Disconnected;
        *status = SessionStatus::Disconnected;
        was_live
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_only_from_disconnected() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect().unwrap();
        assert!(lifecycle.begin_connect().is_err());
        lifecycle.complete_connect();
        assert!(lifecycle.begin_connect().is_err());
        assert!(lifecycle.is_connected());
    }

    #[test]
    fn test_disconnect_cycle_returns_to_disconnected() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect().unwrap();
        lifecycle.complete_connect();
        assert!(lifecycle.begin_disconnect());
        assert_eq!(lifecycle.status(), SessionStatus::Disconnecting);
        lifecycle.complete_disconnect();
        assert_eq!(lifecycle.status(), SessionStatus::Disconnected);
        // The cycle can repeat.
        lifecycle.begin_connect().unwrap();
    }

    #[test]
    fn test_begin_disconnect_is_idempotent() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.begin_disconnect());
        lifecycle.begin_connect().unwrap();
        lifecycle.complete_connect();
        assert!(lifecycle.begin_disconnect());
        assert!(!lifecycle.begin_disconnect());
    }

    #[test]
    fn test_force_disconnect_reports_live_teardown_once() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.force_disconnect());
        lifecycle.begin_connect().unwrap();
        lifecycle.complete_connect();
        assert!(lifecycle.force_disconnect());
        assert!(!lifecycle.force_disconnect());
    }

    #[test]
    fn test_failed_connect_returns_to_disconnected() {
        let lifecycle = Lifecycle::new();
        lifecycle.begin_connect().unwrap();
        lifecycle.fail_connect();
        assert_eq!(lifecycle.status(), SessionStatus::Disconnected);
        lifecycle.begin_connect().unwrap();
    }
}
