use super::RateLimitHeaders;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// Upper bound on how long a caller waits for a discovery request before
/// re-checking the bucket.
pub(crate) const DISCOVERY_WAIT: Duration = Duration::from_secs(1);

/// Tolerance used to decide whether an update describes a new window.
const WINDOW_EPSILON: Duration = Duration::from_millis(50);

#[derive(Debug)]
pub(crate) enum BucketAcquire {
    /// Carries the discovery number when this permit is the one learning
    /// the bucket's quota.
    Permit(Option<u64>),
    Wait(Duration),
}

/// Quota accounting for one route signature.
#[derive(Debug)]
pub(crate) struct Bucket {
    pub(crate) limit: Option<u32>,
    pub(crate) remaining: u32,
    pub(crate) reset_at: Option<Instant>,
    pub(crate) reset_after: Option<Duration>,
    pub(crate) hash: Option<String>,
    pub(crate) discovering: bool,
    discoveries: u64,
    pub(crate) last_used: Instant,
    pub(crate) notify: Arc<Notify>,
}

impl Bucket {
    pub(crate) fn new(now: Instant) -> Self {
        Self {
            limit: None,
            remaining: 0,
            reset_at: None,
            reset_after: None,
            hash: None,
            discovering: false,
            discoveries: 0,
            last_used: now,
            notify: Arc::new(Notify::new()),
        }
    }

    pub(crate) fn try_acquire(&mut self, now: Instant) -> BucketAcquire {
        self.last_used = now;
        self.refill(now);

        // quota still unknown: let exactly one request discover it
        if self.limit.is_none() || (self.remaining == 0 && self.reset_at.is_none()) {
            if self.discovering {
                return BucketAcquire::Wait(DISCOVERY_WAIT);
            }

            self.discovering = true;
            self.discoveries += 1;
            return BucketAcquire::Permit(Some(self.discoveries));
        }

        if self.remaining > 0 {
            self.remaining -= 1;
            return BucketAcquire::Permit(None);
        }

        match self.reset_at {
            Some(reset_at) => BucketAcquire::Wait(reset_at.saturating_duration_since(now)),
            None => BucketAcquire::Wait(DISCOVERY_WAIT),
        }
    }

    pub(crate) fn update(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if let Some(hash) = &headers.bucket {
            self.hash = Some(hash.clone());
        }

        let reset_in = headers.reset_in();
        if let Some(reset_in) = reset_in {
            self.reset_after.get_or_insert(reset_in);
        }

        let new_reset = reset_in.map(|d| now + d);
        let new_window = match (self.reset_at, new_reset) {
            (None, _) => true,
            (Some(current), Some(new)) => new > current + WINDOW_EPSILON || current <= now,
            (Some(current), None) => current <= now,
        };

        if let Some(limit) = headers.limit {
            if self.limit != Some(limit) {
                // the window length is only learnt when the bucket is full
                if headers.remaining.map_or(false, |r| r + 1 >= limit) {
                    self.reset_after = reset_in;
                }
            }
            self.limit = Some(limit);
        }

        if let Some(remaining) = headers.remaining {
            self.remaining = if new_window {
                remaining
            } else {
                // permits granted locally may not have reached the server yet
                self.remaining.min(remaining)
            };
        }

        if let Some(new_reset) = new_reset {
            if new_window || self.reset_at.map_or(true, |r| new_reset > r) {
                self.reset_at = Some(new_reset);
            }
        }

        self.finish_discovery();
    }

    /// Applies a 429 correction: nothing may pass until `retry_after` elapses.
    pub(crate) fn ratelimited(&mut self, retry_after: Duration, now: Instant) {
        self.remaining = 0;

        let until = now + retry_after;
        if self.reset_at.map_or(true, |r| r < until) {
            self.reset_at = Some(until);
        }

        self.finish_discovery();
    }

    /// Called when a request completed without usable ratelimit headers.
    pub(crate) fn release(&mut self) {
        self.finish_discovery();
    }

    /// Ends discovery `id` if it is still the one in progress. Returns
    /// whether anything changed.
    pub(crate) fn abandon_discovery(&mut self, id: u64) -> bool {
        if !self.discovering || self.discoveries != id {
            return false;
        }

        self.finish_discovery();
        true
    }

    pub(crate) fn is_idle(&self, now: Instant) -> bool {
        !self.discovering && self.reset_at.map_or(true, |r| r <= now)
    }

    fn refill(&mut self, now: Instant) {
        let Some(reset_at) = self.reset_at else {
            return;
        };

        if now < reset_at {
            return;
        }

        match self.limit {
            Some(limit) => {
                self.remaining = limit;
                self.reset_at = self.reset_after.map(|window| now + window);
            }
            None => self.reset_at = None,
        }
    }

    fn finish_discovery(&mut self) {
        self.discovering = false;
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(limit: u32, remaining: u32, reset_after_ms: u64) -> RateLimitHeaders {
        RateLimitHeaders {
            limit: Some(limit),
            remaining: Some(remaining),
            reset_after: Some(Duration::from_millis(reset_after_ms)),
            ..Default::default()
        }
    }

    fn is_permit(acquire: BucketAcquire) -> bool {
        matches!(acquire, BucketAcquire::Permit(_))
    }

    #[test]
    fn test_unknown_bucket_grants_single_discovery_permit() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);

        assert!(is_permit(bucket.try_acquire(now)));
        assert!(!is_permit(bucket.try_acquire(now)));

        bucket.update(&headers(5, 4, 1000), now);
        assert!(is_permit(bucket.try_acquire(now)));
        assert_eq!(bucket.remaining, 3);
    }

    #[test]
    fn test_exhausted_bucket_waits_until_reset() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);
        bucket.update(&headers(2, 2, 1000), now);

        assert!(is_permit(bucket.try_acquire(now)));
        assert!(is_permit(bucket.try_acquire(now)));

        match bucket.try_acquire(now + Duration::from_millis(400)) {
            BucketAcquire::Wait(d) => assert_eq!(d, Duration::from_millis(600)),
            BucketAcquire::Permit(_) => panic!("bucket should be exhausted"),
        }

        // reset elapsed: refilled to the limit
        assert!(is_permit(bucket.try_acquire(now + Duration::from_millis(1000))));
        assert_eq!(bucket.remaining, 1);
    }

    #[test]
    fn test_update_in_same_window_never_raises_remaining() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);
        bucket.update(&headers(3, 3, 1000), now);

        assert!(is_permit(bucket.try_acquire(now)));
        assert!(is_permit(bucket.try_acquire(now)));
        assert!(is_permit(bucket.try_acquire(now)));

        // response to the first request arrives late and reports 2 left
        bucket.update(&headers(3, 2, 990), now + Duration::from_millis(10));
        assert_eq!(bucket.remaining, 0);
        assert!(!is_permit(bucket.try_acquire(now + Duration::from_millis(10))));
    }

    #[test]
    fn test_ratelimited_pauses_bucket() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);
        bucket.update(&headers(5, 5, 100), now);

        bucket.ratelimited(Duration::from_secs(2), now);
        match bucket.try_acquire(now + Duration::from_millis(500)) {
            BucketAcquire::Wait(d) => assert_eq!(d, Duration::from_millis(1500)),
            BucketAcquire::Permit(_) => panic!("bucket should be paused"),
        }
    }

    #[test]
    fn test_abandoned_discovery_lets_next_request_discover() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);

        let BucketAcquire::Permit(Some(first)) = bucket.try_acquire(now) else {
            panic!("expected discovery permit");
        };
        assert!(!bucket.is_idle(now));

        assert!(bucket.abandon_discovery(first));
        assert!(bucket.is_idle(now));

        let BucketAcquire::Permit(Some(second)) = bucket.try_acquire(now) else {
            panic!("expected a fresh discovery permit");
        };

        // a stale permit must not end the newer discovery
        assert!(!bucket.abandon_discovery(first));
        assert!(bucket.discovering);
        assert!(bucket.abandon_discovery(second));
    }

    #[test]
    fn test_abandon_after_update_is_noop() {
        let now = Instant::now();
        let mut bucket = Bucket::new(now);

        let BucketAcquire::Permit(Some(id)) = bucket.try_acquire(now) else {
            panic!("expected discovery permit");
        };
        bucket.update(&headers(5, 4, 1000), now);

        assert!(!bucket.abandon_discovery(id));
        assert!(is_permit(bucket.try_acquire(now)));
        assert_eq!(bucket.remaining, 3);
    }
}
