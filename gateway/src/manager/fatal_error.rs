use crate::gateway::GatewayError;
use std::fmt;

/// A shard stopped and will not be restarted on its own.
#[derive(Debug)]
pub struct FatalError {
    pub shard_id: u16,
    pub error: GatewayError,
}

impl FatalError {
    pub fn new(shard_id: u16, error: GatewayError) -> FatalError {
        FatalError { shard_id, error }
    }
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "shard {} stopped: {}", self.shard_id, self.error)
    }
}

impl std::error::Error for FatalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
