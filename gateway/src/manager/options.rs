use super::{IdentifyQueue, DEFAULT_IDENTIFY_INTERVAL};
use crate::gateway::ShardOptions;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Which shards a manager runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardCount {
    /// Use the shard count recommended by `/gateway/bot` and run all of them.
    Auto,
    Fixed {
        total: u16,
        // Inclusive
        lowest: u16,
        // Exclusive
        highest: u16,
    },
}

impl ShardCount {
    /// Runs every shard of `total` in this process.
    pub fn all(total: u16) -> ShardCount {
        ShardCount::Fixed {
            total,
            lowest: 0,
            highest: total,
        }
    }

    /// The range owned by cluster `cluster_id` when `cluster_count` clusters
    /// each run `cluster_size` shards.
    pub fn cluster(cluster_id: u16, cluster_size: u16, cluster_count: u16) -> ShardCount {
        ShardCount::Fixed {
            total: cluster_size * cluster_count,
            lowest: cluster_size * cluster_id,
            highest: cluster_size * (cluster_id + 1),
        }
    }

    pub(crate) fn range(&self, total: u16) -> Range<u16> {
        match *self {
            ShardCount::Auto => 0..total,
            ShardCount::Fixed { lowest, highest, .. } => lowest.min(total)..highest.min(total),
        }
    }
}

#[derive(Clone)]
pub struct ManagerOptions {
    pub shard: ShardOptions,
    /// Minimum time between identifies sharing a concurrency key.
    pub identify_interval: Duration,
    /// Used for [`ShardCount::Fixed`]. `Auto` takes it from `/gateway/bot`.
    pub max_concurrency: u16,
    /// Replaces the built in identify queue, e.g. to coordinate several
    /// processes.
    pub identify_queue: Option<Arc<dyn IdentifyQueue>>,
    pub event_queue_capacity: usize,
}

impl ManagerOptions {
    pub fn new(shard: ShardOptions) -> Self {
        Self {
            shard,
            identify_interval: DEFAULT_IDENTIFY_INTERVAL,
            max_concurrency: 1,
            identify_queue: None,
            event_queue_capacity: 256,
        }
    }
}
