use super::Opcode;
use serde::Deserialize;
use serde_json::value::RawValue;

/// Envelope of every frame received from the gateway. `data` is left raw so
/// dispatches reach consumers without being re-serialized.
#[derive(Deserialize, Debug)]
pub struct Payload {
    #[serde(rename = "op")]
    pub opcode: Opcode,

    #[serde(rename = "s", default)]
    pub seq: Option<u64>,

    #[serde(rename = "t", default)]
    pub event_name: Option<String>,

    #[serde(rename = "d", default)]
    pub data: Option<Box<RawValue>>,
}

impl Payload {
    pub fn data_str(&self) -> &str {
        self.data.as_deref().map_or("null", RawValue::get)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch() {
        let payload: Payload = serde_json::from_str(
            r#"{"op":0,"s":42,"t":"MESSAGE_CREATE","d":{"id":"1","content":"hi"}}"#,
        )
        .unwrap();

        assert_eq!(payload.opcode, Opcode::Dispatch);
        assert_eq!(payload.seq, Some(42));
        assert_eq!(payload.event_name.as_deref(), Some("MESSAGE_CREATE"));
        assert_eq!(payload.data_str(), r#"{"id":"1","content":"hi"}"#);
    }

    #[test]
    fn test_control_frame() {
        let payload: Payload = serde_json::from_str(r#"{"op":11,"s":null,"t":null,"d":null}"#).unwrap();

        assert_eq!(payload.opcode, Opcode::HeartbeatAck);
        assert!(payload.seq.is_none());
        assert!(payload.data.is_none());

        let payload: Payload = serde_json::from_str(r#"{"op":7}"#).unwrap();
        assert_eq!(payload.opcode, Opcode::Reconnect);
    }

    #[test]
    fn test_unknown_opcode() {
        assert!(serde_json::from_str::<Payload>(r#"{"op":99,"d":null}"#).is_err());
    }
}
