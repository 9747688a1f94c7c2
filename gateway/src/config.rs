use crate::gateway::ShardOptions;
use crate::manager::{ManagerOptions, ShardCount};
use crate::Result;
use common::BackoffOptions;
use rest::DispatcherOptions;
use serde::Deserialize;
use std::time::Duration;

/// Runner configuration, read from environment variables.
#[derive(Deserialize, Debug)]
pub struct Config {
    // Required
    pub sharder_token: String,

    #[serde(default = "default_intents")]
    pub intents: u64,

    // Sharding. Without a shard count the recommended count is fetched.
    pub shard_count: Option<u16>,
    pub cluster_id: Option<u16>,
    pub cluster_size: Option<u16>,
    pub cluster_count: Option<u16>,
    #[serde(default = "one")]
    pub max_concurrency: u16,
    #[serde(default = "default_identify_interval_ms")]
    pub identify_interval_ms: u64,

    pub gateway_url: Option<String>,
    pub api_url: Option<String>,
    pub large_threshold: Option<u8>,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    // Observability
    pub sentry_dsn: Option<String>,
    #[serde(default)]
    pub debug_mode: bool,
    #[serde(default)]
    pub json_log: bool,

    #[cfg(feature = "metrics")]
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

impl Config {
    pub fn from_envvar() -> Result<Config> {
        Ok(envy::from_env::<Config>()?)
    }

    pub fn shard_count(&self) -> ShardCount {
        match (self.cluster_id, self.cluster_size, self.cluster_count) {
            (Some(cluster_id), Some(cluster_size), Some(cluster_count)) => {
                ShardCount::cluster(cluster_id, cluster_size, cluster_count)
            }
            _ => match self.shard_count {
                Some(total) => ShardCount::all(total),
                None => ShardCount::Auto,
            },
        }
    }

    pub fn shard_options(&self) -> ShardOptions {
        let mut options = ShardOptions::new(self.sharder_token.clone(), self.intents);

        if let Some(gateway_url) = &self.gateway_url {
            options.gateway_url = gateway_url.clone();
        }

        options.large_threshold = self.large_threshold;
        options.backoff = BackoffOptions::from_millis(self.backoff_base_ms, self.backoff_max_ms);
        options.max_reconnect_attempts = self.max_reconnect_attempts;
        options
    }

    pub fn manager_options(&self) -> ManagerOptions {
        let mut options = ManagerOptions::new(self.shard_options());
        options.identify_interval = Duration::from_millis(self.identify_interval_ms);
        options.max_concurrency = self.max_concurrency;
        options.event_queue_capacity = self.event_queue_capacity;
        options
    }

    pub fn dispatcher_options(&self) -> DispatcherOptions {
        let mut options = DispatcherOptions::new(self.sharder_token.clone());

        if let Some(api_url) = &self.api_url {
            options.api_url = api_url.trim_end_matches('/').to_owned();
        }

        options
    }
}

// GUILDS | GUILD_MESSAGES
fn default_intents() -> u64 {
    1 | 1 << 9
}

fn one() -> u16 {
    1
}

fn default_identify_interval_ms() -> u64 {
    5000
}

fn default_backoff_base_ms() -> u64 {
    1000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_event_queue_capacity() -> usize {
    256
}

#[cfg(feature = "metrics")]
fn default_metrics_addr() -> String {
    "0.0.0.0:9091".to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(vars: &[(&str, &str)]) -> std::result::Result<Config, envy::Error> {
        envy::from_iter(vars.iter().map(|(k, v)| (k.to_string(), v.to_string())))
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[("SHARDER_TOKEN", "abc")]).unwrap();

        assert_eq!(config.intents, 513);
        assert_eq!(config.shard_count(), ShardCount::Auto);

        let options = config.manager_options();
        assert_eq!(options.shard.token, "abc");
        assert_eq!(options.identify_interval, Duration::from_secs(5));
        assert_eq!(options.shard.gateway_url, crate::gateway::DEFAULT_GATEWAY_URL);
        assert_eq!(config.dispatcher_options().api_url, rest::DEFAULT_API_URL);
    }

    #[test]
    fn test_cluster() {
        let config = parse(&[
            ("SHARDER_TOKEN", "abc"),
            ("SHARD_COUNT", "100"),
            ("CLUSTER_ID", "1"),
            ("CLUSTER_SIZE", "8"),
            ("CLUSTER_COUNT", "4"),
            ("API_URL", "http://localhost:8080/api/"),
        ])
        .unwrap();

        assert_eq!(
            config.shard_count(),
            ShardCount::Fixed {
                total: 32,
                lowest: 8,
                highest: 16
            }
        );
        assert_eq!(config.dispatcher_options().api_url, "http://localhost:8080/api");
    }

    #[test]
    fn test_fixed_count() {
        let config = parse(&[("SHARDER_TOKEN", "abc"), ("SHARD_COUNT", "3")]).unwrap();
        assert_eq!(config.shard_count(), ShardCount::all(3));
    }

    #[test]
    fn test_missing_token() {
        assert!(parse(&[("SHARD_COUNT", "3")]).is_err());
    }
}
