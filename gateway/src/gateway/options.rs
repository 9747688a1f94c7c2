use crate::gateway::payloads::StatusUpdate;
use common::BackoffOptions;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg";
pub const API_VERSION: u8 = 10;

/// Settings shared by every shard of a manager.
#[derive(Clone, Debug)]
pub struct ShardOptions {
    pub token: String,
    pub intents: u64,
    /// Used when no session can be resumed. Replaced by the url returned from
    /// `/gateway/bot` when the shard count is discovered.
    pub gateway_url: String,
    pub large_threshold: Option<u8>,
    pub presence: Option<StatusUpdate>,
    pub connect_timeout: Duration,
    pub backoff: BackoffOptions,
    /// Consecutive failed connection attempts tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Bounds of the random wait before re-identifying after an invalid session.
    pub invalid_session_delay: (Duration, Duration),
    /// Consecutive invalid sessions tolerated while identifying.
    pub max_invalid_sessions: u32,
}

impl ShardOptions {
    pub fn new(token: impl Into<String>, intents: u64) -> Self {
        Self {
            token: token.into(),
            intents,
            ..Default::default()
        }
    }

    /// Gateway url with version, encoding and transport compression applied.
    pub fn connect_url(base: &str) -> Result<url::Url, url::ParseError> {
        let mut url = url::Url::parse(base)?;

        url.query_pairs_mut()
            .clear()
            .append_pair("v", &API_VERSION.to_string())
            .append_pair("encoding", "json");

        #[cfg(feature = "compression")]
        {
            url.query_pairs_mut().append_pair("compress", "zlib-stream");
        }

        Ok(url)
    }
}

impl Default for ShardOptions {
    fn default() -> Self {
        Self {
            token: String::new(),
            intents: 0,
            gateway_url: DEFAULT_GATEWAY_URL.to_owned(),
            large_threshold: None,
            presence: None,
            connect_timeout: Duration::from_secs(10),
            backoff: BackoffOptions::from_millis(1000, 60_000),
            max_reconnect_attempts: 10,
            invalid_session_delay: (Duration::from_secs(1), Duration::from_secs(5)),
            max_invalid_sessions: 3,
        }
    }
}
