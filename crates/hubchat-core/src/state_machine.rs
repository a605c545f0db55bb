use crate::{error::UsageError, events::SessionEvent, types::ConnectionState};

/// Connection lifecycle of the session connector.
///
/// Only transport callbacks and explicit `connect`/`disconnect` calls move
/// it. `Online -> Connecting` on a drop; the transport owns the retry.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    reached_online: bool,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Inactive,
            reached_online: false,
        }
    }
}

impl ConnectionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != ConnectionState::Inactive
    }

    /// Explicit `connect()`: `Inactive -> Connecting`.
    pub fn begin_connect(&mut self) -> Result<(), UsageError> {
        if self.state != ConnectionState::Inactive {
            return Err(UsageError::already_connected("session connector"));
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    /// Transport opened. Returns `None` when the connector is inactive.
    pub fn on_open(&mut self) -> Option<SessionEvent> {
        if self.state == ConnectionState::Inactive {
            return None;
        }
        self.state = ConnectionState::Online;

        if self.reached_online {
            Some(SessionEvent::Reconnected)
        } else {
            self.reached_online = true;
            Some(SessionEvent::Connected)
        }
    }

    /// Transport closed. Returns `None` unless the connector was online.
    pub fn on_close(&mut self) -> Option<SessionEvent> {
        if self.state != ConnectionState::Online {
            return None;
        }
        self.state = ConnectionState::Connecting;
        Some(SessionEvent::Disconnected)
    }

    /// Whether the transport has been online at least once since `connect()`.
    pub fn has_been_online(&self) -> bool {
        self.reached_online
    }

    /// Explicit `disconnect()` or an abandoned connect attempt.
    pub fn reset(&mut self) {
        self.state = ConnectionState::Inactive;
        self.reached_online = false;
    }
}
