//! Connection lifecycle

/// Observable state of a channel
///
/// Transitions only move forward: `Waiting → Connected`,
/// `Waiting → Disconnected`, `Connected → Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConnectionState {
    Disconnected = 0,
    Connected = 1,
    Waiting = 2,
}

impl ConnectionState {
    fn rank(self) -> u8 {
        match self {
            Self::Waiting => 0,
            Self::Connected => 1,
            Self::Disconnected => 2,
        }
    }

    /// Move to `next` if that is a forward transition; returns the resulting state
    pub fn advance(&mut self, next: ConnectionState) -> ConnectionState {
        if next.rank() > self.rank() {
            *self = next;
        }
        *self
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Disconnected
    }

    /// Status code exposed over the C interface
    pub fn as_code(self) -> i32 {
        self as i32
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// Outcome of one step of the asynchronous client handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectProgress {
    Connected,
    Pending,
}
