mod bucket;

mod headers;
pub use headers::{RateLimitHeaders, RateLimitedBody};

mod limiter;
pub use limiter::{Acquire, BucketSnapshot, Permit, RateLimiter};
