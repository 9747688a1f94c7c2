use serde::Deserialize;
use std::time::Duration;

#[derive(Deserialize, Debug)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

impl Hello {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval)
    }
}
