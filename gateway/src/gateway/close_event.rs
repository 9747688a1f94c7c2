use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

/// Close frame received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub status_code: u16,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Reconnect and resume the existing session.
    Resume,
    /// Reconnect with a fresh identify.
    Identify,
    /// The token was rejected. Never retried.
    Unauthorized,
    /// The connection can not succeed without a configuration change.
    Fatal,
}

impl CloseEvent {
    pub fn new(status_code: u16, error: String) -> Self {
        Self { status_code, error }
    }

    pub fn from_frame(frame: Option<CloseFrame<'_>>) -> Self {
        match frame {
            Some(frame) => Self::new(u16::from(frame.code), frame.reason.into_owned()),
            None => Self::new(u16::from(CloseCode::Status), String::new()),
        }
    }

    pub fn action(&self) -> CloseAction {
        match self.status_code {
            4004 => CloseAction::Unauthorized,
            4010..=4014 => CloseAction::Fatal,
            4007 | 4009 => CloseAction::Identify,
            _ => CloseAction::Resume,
        }
    }
}
