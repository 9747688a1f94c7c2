use crate::Result;
use rest::{Request, RequestDispatcher};
use serde::Deserialize;
use std::time::Duration;

/// Response of `GET /gateway/bot`.
#[derive(Deserialize, Debug, Clone)]
pub struct GatewayBot {
    pub url: String,
    pub shards: u16,
    pub session_start_limit: SessionStartLimit,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// milliseconds
    pub reset_after: u64,
    pub max_concurrency: u16,
}

impl SessionStartLimit {
    pub fn reset_after(&self) -> Duration {
        Duration::from_millis(self.reset_after)
    }
}

impl GatewayBot {
    pub async fn fetch(rest: &RequestDispatcher) -> Result<GatewayBot> {
        let res = rest.request(Request::get("/gateway/bot")).await?;
        Ok(res.json()?)
    }
}
