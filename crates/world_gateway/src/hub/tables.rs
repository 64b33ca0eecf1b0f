//! Region tables readable by every connection.
//!
//! Terrain is written once during bootstrap, before the gateway accepts
//! connections, and never changes afterwards. Room snapshots are written only
//! by the hub task; each write swaps in a complete `Arc<RoomState>`, so a
//! reader always observes either the previous or the next snapshot in full.

use crate::region::{RoomId, RoomState, RoomTerrain};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RegionTables {
    terrain: DashMap<RoomId, Arc<RoomTerrain>>,
    entities: DashMap<RoomId, Arc<RoomState>>,
}

impl RegionTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a room's terrain. Only called by the terrain bootstrapper.
    pub fn insert_terrain(&self, terrain: RoomTerrain) {
        self.terrain.insert(terrain.room_id, Arc::new(terrain));
    }

    pub fn terrain(&self, room_id: &RoomId) -> Option<Arc<RoomTerrain>> {
        self.terrain.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn entities(&self, room_id: &RoomId) -> Option<Arc<RoomState>> {
        self.entities.get(room_id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn terrain_count(&self) -> usize {
        self.terrain.len()
    }

    pub fn room_count(&self) -> usize {
        self.entities.len()
    }

    pub(crate) fn store_entities(&self, state: Arc<RoomState>) {
        self.entities.insert(state.room_id, state);
    }
}
