//! The upstream simulation collaborator.
//!
//! The gateway consumes three calls from the simulation: a stream of entity
//! batches, the list of known rooms and the static terrain of one room. They
//! are abstracted by [`WorldSource`] so the hub, the reader and the terrain
//! bootstrapper do not depend on the transport.

pub mod channel;
pub mod reader;
pub mod terrain;
pub mod ws_client;

pub use channel::{
    wait_for_connection_ready, Connectivity, ConnectivityState, DialPolicy, ReconnectBackoff,
    UpstreamChannel,
};
pub use reader::listen_to_world;
pub use terrain::init_terrain;
pub use ws_client::WsWorldClient;

use crate::error::UpstreamError;
use crate::region::{RoomEntities, RoomId, RoomTerrain};
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Entity batches as they arrive. The stream ending means the simulation
/// closed the feed gracefully.
pub type EntityStream = BoxStream<'static, Result<RoomEntities, UpstreamError>>;

/// Calls the gateway makes against the simulation service.
#[async_trait]
pub trait WorldSource: Send + Sync {
    /// Opens a new subscription to the entity feed.
    async fn entities(&self) -> Result<EntityStream, UpstreamError>;

    /// Lists every room the simulation knows about.
    async fn room_list(&self) -> Result<Vec<RoomId>, UpstreamError>;

    /// Fetches the static terrain of one room.
    async fn room_terrain(&self, room_id: RoomId) -> Result<RoomTerrain, UpstreamError>;
}
