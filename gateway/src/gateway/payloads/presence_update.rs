use super::Opcode;
use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

#[derive(Serialize, Debug)]
pub struct PresenceUpdate<'a> {
    #[serde(rename = "op")]
    opcode: Opcode,

    #[serde(rename = "d")]
    data: &'a StatusUpdate,
}

impl<'a> PresenceUpdate<'a> {
    pub fn new(presence: &'a StatusUpdate) -> Self {
        PresenceUpdate {
            opcode: Opcode::PresenceUpdate,
            data: presence,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub since: Option<u64>,
    pub activities: Vec<Activity>,
    pub status: StatusType,
    pub afk: bool,
}

impl StatusUpdate {
    pub fn new(activity_type: ActivityType, status: String, status_type: StatusType) -> StatusUpdate {
        StatusUpdate {
            since: None,
            activities: vec![Activity::new(status, activity_type)],
            status: status_type,
            afk: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Activity {
    pub name: String,

    #[serde(rename = "type")]
    pub activity_type: ActivityType,

    /// only valid when activity_type = streaming
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl Activity {
    pub fn new(name: String, activity_type: ActivityType) -> Activity {
        Activity {
            name,
            activity_type,
            url: None,
        }
    }
}

#[derive(Serialize_repr, Deserialize_repr, Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum ActivityType {
    Game = 0,
    Streaming = 1,
    Listening = 2,
    Watching = 3,
    Custom = 4,
    Competing = 5,
}

#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StatusType {
    Online,
    Dnd,
    Idle,
    Invisible,
    Offline,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize() {
        let status = StatusUpdate::new(ActivityType::Listening, "t!help".to_owned(), StatusType::Online);
        let encoded = serde_json::to_value(PresenceUpdate::new(&status)).unwrap();

        assert_eq!(
            encoded,
            json!({
                "op": 3,
                "d": {
                    "since": null,
                    "activities": [{"name": "t!help", "type": 2}],
                    "status": "online",
                    "afk": false,
                }
            })
        );
    }
}
