use common::BackoffOptions;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

#[derive(Clone, Debug)]
pub struct DispatcherOptions {
    /// Base url every request path is appended to, without a trailing slash.
    pub api_url: String,
    pub token: String,
    pub user_agent: String,
    /// Attempts per request for 5xx and transport failures.
    pub max_attempts: u32,
    /// Consecutive 429s tolerated before giving up.
    pub max_ratelimit_retries: u32,
    pub backoff: BackoffOptions,
    /// Per-attempt timeout.
    pub request_timeout: Duration,
    /// Longest a request may wait for its bucket before failing.
    pub deadline: Duration,
    pub max_in_flight: usize,
    pub bucket_capacity: usize,
}

impl DispatcherOptions {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            ..Default::default()
        }
    }
}

impl Default for DispatcherOptions {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_owned(),
            token: String::new(),
            user_agent: format!(
                "DiscordBot ({}, {})",
                env!("CARGO_PKG_REPOSITORY"),
                env!("CARGO_PKG_VERSION")
            ),
            max_attempts: 5,
            max_ratelimit_retries: 10,
            backoff: BackoffOptions::from_millis(500, 30_000),
            request_timeout: Duration::from_secs(15),
            deadline: Duration::from_secs(60),
            max_in_flight: 64,
            bucket_capacity: 1024,
        }
    }
}
