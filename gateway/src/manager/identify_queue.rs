use super::SessionStartLimit;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

pub const DEFAULT_IDENTIFY_INTERVAL: Duration = Duration::from_secs(5);

const SESSION_LIMIT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Gate every shard passes before sending identify.
#[async_trait]
pub trait IdentifyQueue: Send + Sync + 'static {
    /// Resolves once `shard_id` may identify.
    async fn wait(&self, shard_id: u16);
}

/// In-process identify gate. Shards share a slot when their ids are equal
/// modulo `max_concurrency`; each slot admits one identify per interval.
pub struct LocalIdentifyQueue {
    max_concurrency: u16,
    interval: Duration,
    state: Mutex<QueueState>,
}

struct QueueState {
    next: Vec<Instant>,
    session_limit: Option<SessionLimit>,
}

struct SessionLimit {
    total: u32,
    remaining: u32,
    reset_at: Instant,
}

impl LocalIdentifyQueue {
    pub fn new(max_concurrency: u16, interval: Duration) -> Self {
        let max_concurrency = max_concurrency.max(1);
        let now = Instant::now();

        Self {
            max_concurrency,
            interval,
            state: Mutex::new(QueueState {
                next: vec![now; max_concurrency as usize],
                session_limit: None,
            }),
        }
    }

    /// Builds a queue that also honours the daily session start limit.
    pub fn from_limit(limit: &SessionStartLimit, interval: Duration) -> Self {
        let queue = Self::new(limit.max_concurrency, interval);

        queue.state.lock().session_limit = Some(SessionLimit {
            total: limit.total.max(1),
            remaining: limit.remaining,
            reset_at: Instant::now() + limit.reset_after(),
        });

        queue
    }

    pub fn max_concurrency(&self) -> u16 {
        self.max_concurrency
    }

    /// Claims the next identify slot for `shard_id` and returns when it opens.
    fn reserve(&self, shard_id: u16, now: Instant) -> Instant {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let key = (shard_id % self.max_concurrency) as usize;
        let mut slot = state.next[key].max(now);

        if let Some(limit) = &mut state.session_limit {
            if slot >= limit.reset_at {
                limit.remaining = limit.total;
                limit.reset_at = slot + SESSION_LIMIT_WINDOW;
            }

            if limit.remaining == 0 {
                warn!(
                    shard_id,
                    wait_secs = limit.reset_at.saturating_duration_since(now).as_secs(),
                    "Session start limit exhausted, waiting for reset"
                );

                slot = limit.reset_at;
                limit.remaining = limit.total;
                limit.reset_at += SESSION_LIMIT_WINDOW;
            }

            limit.remaining -= 1;
        }

        state.next[key] = slot + self.interval;
        slot
    }
}

#[async_trait]
impl IdentifyQueue for LocalIdentifyQueue {
    async fn wait(&self, shard_id: u16) {
        let now = Instant::now();
        let slot = self.reserve(shard_id, now);

        if slot > now {
            debug!(shard_id, wait_ms = (slot - now).as_millis() as u64, "Waiting for identify slot");
        }

        sleep_until(slot).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_same_key_is_spaced_by_interval() {
        let queue = Arc::new(LocalIdentifyQueue::new(1, DEFAULT_IDENTIFY_INTERVAL));
        let start = Instant::now();

        let mut handles = Vec::new();
        for shard_id in 0..3 {
            let queue = Arc::clone(&queue);
            handles.push(tokio::spawn(async move {
                queue.wait(shard_id).await;
                Instant::now()
            }));
        }

        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap() - start);
        }
        times.sort();

        assert_eq!(
            times,
            vec![Duration::ZERO, Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_keys_run_concurrently() {
        let queue = LocalIdentifyQueue::new(2, DEFAULT_IDENTIFY_INTERVAL);
        let start = Instant::now();

        queue.wait(0).await;
        queue.wait(1).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        // shard 2 shares a key with shard 0
        queue.wait(2).await;
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_start_limit() {
        let limit = SessionStartLimit {
            total: 1000,
            remaining: 1,
            reset_after: 60_000,
            max_concurrency: 1,
        };
        let queue = LocalIdentifyQueue::from_limit(&limit, DEFAULT_IDENTIFY_INTERVAL);
        let start = Instant::now();

        queue.wait(0).await;
        assert_eq!(start.elapsed(), Duration::ZERO);

        queue.wait(0).await;
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }
}
