//! Region data model shared by the hub, the connection pumps and the upstream adapter.
//!
//! Entity and terrain contents are produced by the simulation and are never
//! interpreted by the gateway, so they are carried as opaque JSON values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque entity record (bot, structure or resource) as produced by the simulation.
pub type Entity = serde_json::Value;

/// Axial coordinate of a room (region) in the simulated world.
///
/// Used as the key for all per-region state. Serialized as `{"q": .., "r": ..}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoomId {
    pub q: i32,
    pub r: i32,
}

impl RoomId {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.q, self.r)
    }
}

/// One upstream batch: the complete entity lists of a single room at a world tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomEntities {
    pub world_time: i64,
    pub room_id: RoomId,
    #[serde(default)]
    pub bots: Vec<Entity>,
    #[serde(default)]
    pub structures: Vec<Entity>,
    #[serde(default)]
    pub resources: Vec<Entity>,
}

/// The hub's current snapshot of a room.
///
/// A new snapshot replaces the previous one wholesale; entity lists are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomState {
    pub time: i64,
    pub room_id: RoomId,
    pub bots: Vec<Entity>,
    pub structures: Vec<Entity>,
    pub resources: Vec<Entity>,
}

impl From<RoomEntities> for RoomState {
    fn from(update: RoomEntities) -> Self {
        Self {
            time: update.world_time,
            room_id: update.room_id,
            bots: update.bots,
            structures: update.structures,
            resources: update.resources,
        }
    }
}

/// Static terrain of a room, fetched once at startup.
///
/// Only `room_id` is interpreted; every other field is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomTerrain {
    pub room_id: RoomId,
    #[serde(flatten)]
    pub data: serde_json::Map<String, serde_json::Value>,
}

impl RoomTerrain {
    pub fn new(room_id: RoomId) -> Self {
        Self {
            room_id,
            data: serde_json::Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn room_entities_use_camel_case_fields() {
        let update: RoomEntities = serde_json::from_value(json!({
            "worldTime": 12,
            "roomId": { "q": -1, "r": 3 },
            "bots": [{ "id": 1 }]
        }))
        .expect("valid batch");

        assert_eq!(update.room_id, RoomId::new(-1, 3));
        assert_eq!(update.bots.len(), 1);
        assert!(update.structures.is_empty());

        let state = RoomState::from(update);
        let encoded = serde_json::to_value(&state).unwrap();
        assert_eq!(encoded["time"], 12);
        assert_eq!(encoded["roomId"], json!({ "q": -1, "r": 3 }));
    }

    #[test]
    fn terrain_keeps_unknown_fields() {
        let raw = json!({ "room_id": { "q": 0, "r": 0 }, "tiles": ["plain", "wall"] });
        let terrain: RoomTerrain = serde_json::from_value(raw.clone()).unwrap();

        assert_eq!(terrain.room_id, RoomId::default());
        assert_eq!(serde_json::to_value(&terrain).unwrap(), raw);
    }
}
