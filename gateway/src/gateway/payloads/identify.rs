use super::{Opcode, StatusUpdate};
use crate::gateway::ShardInfo;
use serde::Serialize;

#[derive(Serialize, Debug)]
pub struct Identify<'a> {
    #[serde(rename = "op")]
    opcode: Opcode,

    #[serde(rename = "d")]
    pub data: IdentifyData<'a>,
}

impl<'a> Identify<'a> {
    pub fn new(
        token: &'a str,
        large_threshold: Option<u8>,
        shard_info: ShardInfo,
        presence: Option<&'a StatusUpdate>,
        intents: u64,
    ) -> Self {
        Identify {
            opcode: Opcode::Identify,
            data: IdentifyData {
                token,
                properties: ConnectionProperties::new(),
                large_threshold,
                shard_info,
                presence,
                intents,
            },
        }
    }
}

#[derive(Serialize, Debug)]
pub struct IdentifyData<'a> {
    pub token: &'a str,

    pub properties: ConnectionProperties,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<u8>,

    #[serde(rename = "shard")]
    pub shard_info: ShardInfo,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<&'a StatusUpdate>,

    pub intents: u64,
}

#[derive(Serialize, Debug)]
pub struct ConnectionProperties {
    pub os: &'static str,
    pub browser: &'static str,
    pub device: &'static str,
}

const LIBRARY_NAME: &str = "tickets.rs";

impl ConnectionProperties {
    pub fn new() -> ConnectionProperties {
        ConnectionProperties {
            os: std::env::consts::OS,
            browser: LIBRARY_NAME,
            device: LIBRARY_NAME,
        }
    }
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize() {
        let identify = Identify::new("abc", Some(250), ShardInfo::new(3, 16), None, 513);
        let encoded = serde_json::to_value(&identify).unwrap();

        assert_eq!(encoded["op"], 2);
        assert_eq!(encoded["d"]["token"], "abc");
        assert_eq!(encoded["d"]["shard"], serde_json::json!([3, 16]));
        assert_eq!(encoded["d"]["intents"], 513);
        assert_eq!(encoded["d"]["large_threshold"], 250);
        assert_eq!(encoded["d"]["properties"]["browser"], LIBRARY_NAME);
        assert!(encoded["d"].get("presence").is_none());
    }
}
