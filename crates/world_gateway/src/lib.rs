//! # World Gateway
//!
//! Republishes per-room simulation state to websocket subscribers.
//!
//! The gateway holds a single upstream subscription to the simulation's entity
//! feed and fans every room update out to the subscribers that asked for that
//! room. A subscriber that joins a room first receives the room's static
//! terrain and its latest entities, then every later update.
//!
//! ## Architecture Overview
//!
//! * **Upstream reader** - reads entity batches and hands them to the hub one
//!   at a time; a slow hub slows the reader down
//! * **Hub** - the single task that owns room snapshots and the set of
//!   registered connections, and evicts subscribers that cannot keep up
//! * **Terrain bootstrap** - loads every room's terrain before the listener
//!   is bound; any failure aborts startup
//! * **Connections** - an inbound pump applying subscription messages and an
//!   outbound pump writing terrain, entities and keepalive pings
//!
//! ### Subscriber protocol
//!
//! Control messages are JSON objects tagged by `ty`:
//!
//! ```json
//! { "ty": "room_id", "room_id": { "q": 0, "r": 0 } }
//! { "ty": "room_ids", "room_ids": [{ "q": 0, "r": 0 }, { "q": 1, "r": 0 }] }
//! { "ty": "unsubscribe_room_id", "room_id": { "q": 0, "r": 0 } }
//! { "ty": "unsubscribe_room_ids", "room_ids": [{ "q": 1, "r": 0 }] }
//! { "ty": "clear_room_ids" }
//! ```
//!
//! Frames sent back are `{"ty": "terrain" | "entities", "payload": ...}`.

pub use config::{ConnectionLimits, ServerConfig, UpstreamConfig};
pub use error::{ServerError, UpstreamError};
pub use hub::{HubHandle, HubStats, RegionTables};
pub use region::{RoomEntities, RoomId, RoomState, RoomTerrain};
pub use server::GatewayServer;
pub use shutdown::ShutdownState;
pub use upstream::{DialPolicy, WorldSource, WsWorldClient};
pub use utils::{connect_upstream, create_gateway};

pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod messaging;
pub mod region;
pub mod server;
pub mod shutdown;
pub mod upstream;
pub mod utils;
