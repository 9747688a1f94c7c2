use super::bucket::{Bucket, BucketAcquire};
use super::RateLimitHeaders;
use crate::Route;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Proof that the holder may send one request on `bucket_key`.
///
/// A discovery permit dropped before the response was applied hands
/// discovery to the next waiter.
#[must_use]
pub struct Permit {
    state: Arc<Mutex<State>>,
    bucket_key: String,
    discovery: Option<u64>,
}

impl Permit {
    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }

    pub fn is_discovery(&self) -> bool {
        self.discovery.is_some()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        let Some(id) = self.discovery else {
            return;
        };

        let mut state = self.state.lock();
        if let Some(bucket) = state.buckets.get_mut(&self.bucket_key) {
            if bucket.abandon_discovery(id) {
                debug!(bucket = %self.bucket_key, "Discovery request abandoned");
            }
        }
    }
}

impl fmt::Debug for Permit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("bucket_key", &self.bucket_key)
            .field("discovery", &self.discovery)
            .finish()
    }
}

#[derive(Debug)]
pub enum Acquire {
    Permit(Permit),
    Wait(Duration),
}

/// Point-in-time view of one bucket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BucketSnapshot {
    pub limit: Option<u32>,
    pub remaining: u32,
    pub reset_in: Option<Duration>,
    pub hash: Option<String>,
}

/// Pause that applies to every bucket of one credential. Owned by a single
/// dispatcher so independent clients never share quota.
#[derive(Debug, Default)]
struct GlobalLimit {
    until: Option<Instant>,
}

#[derive(Debug)]
struct State {
    buckets: HashMap<String, Bucket>,
    global: GlobalLimit,
}

/// Per-route quota tracking. All bucket state sits behind one mutex that is
/// never held across an await.
pub struct RateLimiter {
    state: Arc<Mutex<State>>,
    global_notify: Arc<Notify>,
    capacity: usize,
}

impl RateLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                buckets: HashMap::new(),
                global: GlobalLimit::default(),
            })),
            global_notify: Arc::new(Notify::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn try_acquire(&self, route: &Route) -> Acquire {
        self.try_acquire_at(route, Instant::now()).0
    }

    /// Waits until the route's bucket (and the global limit) allow a request.
    pub async fn acquire(&self, route: &Route) -> Permit {
        loop {
            let (acquire, notify) = self.try_acquire_at(route, Instant::now());

            let wait = match acquire {
                Acquire::Permit(permit) => return permit,
                Acquire::Wait(wait) => wait,
            };

            debug!(route = %route, wait_ms = wait.as_millis() as u64, "Waiting for ratelimit");

            tokio::select! {
                _ = sleep(wait) => {}
                _ = notify.notified() => {}
            }
        }
    }

    /// Applies the accounting of a completed response. `None` means the
    /// response carried no ratelimit headers.
    pub fn update(&self, route: &Route, headers: Option<&RateLimitHeaders>) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if let Some(headers) = headers {
            if headers.global {
                if let Some(retry_after) = headers.retry_after {
                    Self::pause_global(&mut state, retry_after, now);
                }
            }
        }

        match state.buckets.get_mut(route.bucket_key()) {
            Some(bucket) => match headers {
                Some(headers) => bucket.update(headers, now),
                None => bucket.release(),
            },
            None => debug!(route = %route, "Received update for evicted bucket"),
        }
    }

    /// Applies a 429 correction. A global 429 pauses every bucket.
    pub fn ratelimited(&self, route: &Route, retry_after: Duration, global: bool) {
        let now = Instant::now();
        let mut state = self.state.lock();

        if global {
            warn!(route = %route, retry_after_ms = retry_after.as_millis() as u64, "Hit global ratelimit");
            Self::pause_global(&mut state, retry_after, now);
        } else {
            warn!(route = %route, retry_after_ms = retry_after.as_millis() as u64, "Hit route ratelimit");
        }

        if let Some(bucket) = state.buckets.get_mut(route.bucket_key()) {
            if global {
                bucket.release();
            } else {
                bucket.ratelimited(retry_after, now);
            }
        }
    }

    pub fn bucket(&self, route: &Route) -> Option<BucketSnapshot> {
        let now = Instant::now();
        let state = self.state.lock();

        state.buckets.get(route.bucket_key()).map(|b| BucketSnapshot {
            limit: b.limit,
            remaining: b.remaining,
            reset_in: b.reset_at.map(|r| r.saturating_duration_since(now)),
            hash: b.hash.clone(),
        })
    }

    pub fn global_reset_in(&self) -> Option<Duration> {
        let now = Instant::now();
        self.state
            .lock()
            .global
            .until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }

    pub fn len(&self) -> usize {
        self.state.lock().buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn try_acquire_at(&self, route: &Route, now: Instant) -> (Acquire, Arc<Notify>) {
        let mut state = self.state.lock();

        if let Some(until) = state.global.until {
            if until > now {
                return (Acquire::Wait(until - now), Arc::clone(&self.global_notify));
            }
            state.global.until = None;
        }

        if !state.buckets.contains_key(route.bucket_key()) {
            self.evict(&mut state, now);
        }

        let bucket = state
            .buckets
            .entry(route.bucket_key().to_owned())
            .or_insert_with(|| Bucket::new(now));

        let acquire = match bucket.try_acquire(now) {
            BucketAcquire::Permit(discovery) => Acquire::Permit(Permit {
                state: Arc::clone(&self.state),
                bucket_key: route.bucket_key().to_owned(),
                discovery,
            }),
            BucketAcquire::Wait(wait) => Acquire::Wait(wait),
        };

        (acquire, Arc::clone(&bucket.notify))
    }

    /// Drops least recently used idle buckets until there is room for one more.
    fn evict(&self, state: &mut State, now: Instant) {
        while state.buckets.len() >= self.capacity {
            let oldest = state
                .buckets
                .iter()
                .filter(|(_, b)| b.is_idle(now))
                .min_by_key(|(_, b)| b.last_used)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    debug!(bucket = %key, "Evicting ratelimit bucket");
                    state.buckets.remove(&key);
                }
                // every bucket is busy, let the cache grow
                None => break,
            }
        }
    }

    fn pause_global(state: &mut State, retry_after: Duration, now: Instant) {
        let until = now + retry_after;
        if state.global.until.map_or(true, |u| u < until) {
            state.global.until = Some(until);
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(1024)
    }
}
