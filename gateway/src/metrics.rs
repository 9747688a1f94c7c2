use lazy_static::lazy_static;
use prometheus::{register_histogram_vec, register_int_counter_vec, HistogramVec, IntCounterVec};

lazy_static! {
    pub static ref GATEWAY_EVENTS: IntCounterVec = register_int_counter_vec!(
        "gateway_events",
        "Dispatches received from the gateway",
        &["shard", "event"]
    )
    .unwrap();
    pub static ref HEARTBEAT_LATENCY: HistogramVec = register_histogram_vec!(
        "gateway_heartbeat_latency_seconds",
        "Time between a heartbeat and its acknowledgement",
        &["shard"]
    )
    .unwrap();
    pub static ref RECONNECTS: IntCounterVec = register_int_counter_vec!(
        "gateway_reconnects",
        "Gateway connections that ended and were reopened",
        &["shard", "resume"]
    )
    .unwrap();
}
