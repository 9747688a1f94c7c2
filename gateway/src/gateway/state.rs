use std::fmt;

/// Lifecycle of a shard's gateway connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Identifying,
    Resuming,
    Ready,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        *self == ConnectionState::Ready
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Identifying => "identifying",
            ConnectionState::Resuming => "resuming",
            ConnectionState::Ready => "ready",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
