use serde_json::value::RawValue;
use std::time::Instant;

/// A dispatch as handed to consumers.
#[derive(Debug)]
pub struct ShardEvent {
    pub shard_id: u16,
    pub shard_count: u16,
    /// Position of this event among everything the shard has forwarded.
    pub arrival: u64,
    pub received_at: Instant,
    pub seq: u64,
    pub name: String,
    pub data: Box<RawValue>,
}

impl ShardEvent {
    pub fn deserialize<'a, T: serde::Deserialize<'a>>(&'a self) -> serde_json::Result<T> {
        serde_json::from_str(self.data.get())
    }
}
