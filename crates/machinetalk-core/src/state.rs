//! Connection state vocabulary shared by all three endpoints.
//!
//! `ConnectionState` is what applications observe. `SocketState` tracks wire
//! progress internally and never leaks past the endpoint boundary. The two
//! are deliberately decoupled, per spec.md §3.

use std::sync::atomic::{AtomicU8, Ordering};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Trying = 2,
    Connected = 3,
    Timeout = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => ConnectionState::Disconnected,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Trying,
            3 => ConnectionState::Connected,
            4 => ConnectionState::Timeout,
            _ => ConnectionState::Disconnected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Trying => "Trying",
            ConnectionState::Connected => "Connected",
            ConnectionState::Timeout => "Timeout",
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Down = 0,
    Trying = 1,
    Up = 2,
}

impl SocketState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => SocketState::Down,
            1 => SocketState::Trying,
            2 => SocketState::Up,
            _ => SocketState::Down,
        }
    }
}

/// An atomically-readable `ConnectionState`, shared between the I/O worker,
/// timer thread, and public API getters without needing a `Mutex`.
#[derive(Debug)]
pub struct ConnectionStateCell(AtomicU8);

impl ConnectionStateCell {
    pub fn new(initial: ConnectionState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Set the state, returning the previous state.
    pub fn set(&self, state: ConnectionState) -> ConnectionState {
        let prev = self.0.swap(state as u8, Ordering::AcqRel);
        ConnectionState::from_u8(prev)
    }

    pub fn is_connected(&self) -> bool {
        self.get() == ConnectionState::Connected
    }
}

#[derive(Debug)]
pub struct SocketStateCell(AtomicU8);

impl SocketStateCell {
    pub fn new(initial: SocketState) -> Self {
        Self(AtomicU8::new(initial as u8))
    }

    pub fn get(&self) -> SocketState {
        SocketState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: SocketState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_iff_state_connected() {
        let cell = ConnectionStateCell::new(ConnectionState::Disconnected);
        assert!(!cell.is_connected());
        cell.set(ConnectionState::Connected);
        assert!(cell.is_connected());
        cell.set(ConnectionState::Timeout);
        assert!(!cell.is_connected());
    }

    #[test]
    fn set_returns_previous_state() {
        let cell = ConnectionStateCell::new(ConnectionState::Connecting);
        let prev = cell.set(ConnectionState::Connected);
        assert_eq!(prev, ConnectionState::Connecting);
    }
}
