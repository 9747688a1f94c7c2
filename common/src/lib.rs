mod backoff;
pub use backoff::{jitter, jitter_between, Backoff, BackoffOptions};

#[cfg(feature = "prometheus-server")]
pub mod prometheus_server;
