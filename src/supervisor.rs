use serde::{Deserialize, Serialize};

/// Health of the downstream messaging connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Connected,
    Disconnected { since_ms: u64 },
}

/// Request for a full process restart. Reconnection after an upstream
/// network interruption is not always reliable; a clean restart is a cheap,
/// effective recovery. The daemon maps this to process exit; tests just
/// observe the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartSignal {
    /// The messaging transport stayed down past the restart threshold.
    TransportLost { disconnected_ms: u64 },
    /// An operator asked for a restart over the command channel.
    Requested,
}

/// Tracks messaging transport health and escalates a prolonged disconnect
/// to a restart request, exactly once per disconnect episode.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSupervisor {
    state: ConnectionState,
    restart_after_ms: u64,
    signalled: bool,
    disconnect_count: u32,
}

impl ConnectionSupervisor {
    pub fn new(restart_after_ms: u64) -> Self {
        Self {
            // Connected is assumed until the transport reports otherwise
            state: ConnectionState::Connected,
            restart_after_ms,
            signalled: false,
            disconnect_count: 0,
        }
    }

    pub fn on_connected(&mut self) {
        self.state = ConnectionState::Connected;
        self.signalled = false;
    }

    pub fn on_disconnected(&mut self, now_ms: u64) {
        if let ConnectionState::Connected = self.state {
            self.state = ConnectionState::Disconnected { since_ms: now_ms };
            self.disconnect_count = self.disconnect_count.saturating_add(1);
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count
    }

    /// Check the restart threshold. Fires once when the disconnect duration
    /// crosses it; stays quiet afterwards until the next episode.
    pub fn poll(&mut self, now_ms: u64) -> Option<RestartSignal> {
        let ConnectionState::Disconnected { since_ms } = self.state else {
            return None;
        };
        if self.signalled || self.restart_after_ms == 0 {
            return None;
        }
        let elapsed = now_ms.saturating_sub(since_ms);
        if elapsed >= self.restart_after_ms {
            self.signalled = true;
            return Some(RestartSignal::TransportLost {
                disconnected_ms: elapsed,
            });
        }
        None
    }
}
