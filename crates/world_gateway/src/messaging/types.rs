//! Message type definitions for subscriber communication.

use crate::region::{RoomId, RoomState, RoomTerrain};
use serde::{Deserialize, Serialize};

/// A control message sent by a subscriber.
///
/// Fields that do not apply to the message's `ty` are ignored. A missing or
/// `null` `room_id` reads as room (0, 0) and a missing `room_ids` as an empty
/// list.
///
/// ```json
/// { "ty": "room_ids", "room_ids": [{ "q": 0, "r": 0 }, { "q": 1, "r": -1 }] }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    pub ty: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<RoomId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_ids: Option<Vec<RoomId>>,
}

/// Subscription change requested by a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Subscribe(RoomId),
    SubscribeMany(Vec<RoomId>),
    Unsubscribe(RoomId),
    UnsubscribeMany(Vec<RoomId>),
    Clear,
}

impl ClientMessage {
    /// Interprets the message, or `None` for an unrecognized `ty`.
    pub fn into_command(self) -> Option<SubscriptionCommand> {
        let room_id = self.room_id.unwrap_or_default();
        let room_ids = self.room_ids.unwrap_or_default();
        match self.ty.as_str() {
            "room_id" => Some(SubscriptionCommand::Subscribe(room_id)),
            "room_ids" => Some(SubscriptionCommand::SubscribeMany(room_ids)),
            "unsubscribe_room_id" => Some(SubscriptionCommand::Unsubscribe(room_id)),
            "unsubscribe_room_ids" => Some(SubscriptionCommand::UnsubscribeMany(room_ids)),
            "clear_room_ids" => Some(SubscriptionCommand::Clear),
            _ => None,
        }
    }
}

/// A frame sent to a subscriber: `{"ty": "terrain" | "entities", "payload": ...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "ty", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage<'a> {
    Terrain(&'a RoomTerrain),
    Entities(&'a RoomState),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(raw: &str) -> ClientMessage {
        serde_json::from_str(raw).expect("well-formed message")
    }

    #[test]
    fn recognized_tags_map_to_commands() {
        assert_eq!(
            parse(r#"{"ty":"room_id","room_id":{"q":2,"r":-3}}"#).into_command(),
            Some(SubscriptionCommand::Subscribe(RoomId::new(2, -3)))
        );
        assert_eq!(
            parse(r#"{"ty":"room_ids","room_ids":[{"q":0,"r":0},{"q":1,"r":1}]}"#).into_command(),
            Some(SubscriptionCommand::SubscribeMany(vec![RoomId::new(0, 0), RoomId::new(1, 1)]))
        );
        assert_eq!(
            parse(r#"{"ty":"unsubscribe_room_ids","room_ids":null}"#).into_command(),
            Some(SubscriptionCommand::UnsubscribeMany(Vec::new()))
        );
        assert_eq!(
            parse(r#"{"ty":"clear_room_ids"}"#).into_command(),
            Some(SubscriptionCommand::Clear)
        );
        assert_eq!(parse(r#"{"ty":"teleport"}"#).into_command(), None);
    }

    #[test]
    fn missing_room_id_defaults_to_origin() {
        assert_eq!(
            parse(r#"{"ty":"unsubscribe_room_id"}"#).into_command(),
            Some(SubscriptionCommand::Unsubscribe(RoomId::default()))
        );
    }

    #[test]
    fn schema_violations_fail_to_parse() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"room_id":{"q":0,"r":0}}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"ty":"room_id","room_id":"0,0"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn frames_are_tagged_with_payload() {
        let terrain = RoomTerrain::new(RoomId::new(0, 0));
        let frame = serde_json::to_value(ServerMessage::Terrain(&terrain)).unwrap();
        assert_eq!(frame, json!({ "ty": "terrain", "payload": { "room_id": { "q": 0, "r": 0 } } }));

        let state = RoomState {
            time: 5,
            room_id: RoomId::new(1, 1),
            bots: vec![json!({ "id": 9 })],
            structures: Vec::new(),
            resources: Vec::new(),
        };
        let frame = serde_json::to_value(ServerMessage::Entities(&state)).unwrap();
        assert_eq!(frame["ty"], "entities");
        assert_eq!(frame["payload"]["time"], 5);
        assert_eq!(frame["payload"]["bots"], json!([{ "id": 9 }]));
    }
}
