//! The fan-out hub.
//!
//! A single task owns all room snapshots and the set of registered
//! connections. It reacts to three kinds of events, one at a time:
//!
//! * **Room updates** from the upstream reader: the room's snapshot is
//!   replaced and offered to every registered connection subscribed to it.
//! * **Register** / **Unregister** of connections.
//!
//! Delivery never waits on a connection. If a connection's delivery queue is
//! full it is considered unresponsive: it is dropped from the registered set
//! and its queue is closed, which tells its outbound pump to hang up. One slow
//! subscriber therefore never delays the others or the upstream feed.
//!
//! Updates for the same room are applied and fanned out in the order the
//! reader handed them over. Nothing is guaranteed across rooms.

pub mod tables;

pub use tables::RegionTables;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::region::{RoomEntities, RoomState};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace};

/// Point-in-time counters reported by the hub.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Currently registered connections
    pub connections: usize,
    /// Rooms with at least one received update
    pub rooms: usize,
    /// Rooms with bootstrapped terrain
    pub terrain_rooms: usize,
    /// Upstream updates applied since start
    pub updates_applied: u64,
    /// Connections dropped because their delivery queue was full
    pub evictions: u64,
}

/// Events processed by the hub, strictly in arrival order.
#[derive(Debug)]
pub enum HubEvent {
    Update(RoomEntities),
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Stats(oneshot::Sender<HubStats>),
}

/// Returned when the hub task is no longer running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("hub is not running")]
pub struct HubClosed;

/// Number of events the intake holds before senders wait for the hub.
const INTAKE_CAPACITY: usize = 1;

/// The hub's state. Owned and driven by [`Hub::run`].
pub struct Hub {
    tables: Arc<RegionTables>,
    connections: HashMap<ConnectionId, ConnectionHandle>,
    events: mpsc::Receiver<HubEvent>,
    updates_applied: u64,
    evictions: u64,
}

/// Cloneable entry point to a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    tables: Arc<RegionTables>,
    next_connection_id: Arc<AtomicUsize>,
}

impl Hub {
    /// Creates a hub over `tables` together with the handle used to feed it.
    ///
    /// The intake is a rendezvous-sized queue, so a busy hub stalls the
    /// upstream reader instead of buffering batches.
    pub fn new(tables: Arc<RegionTables>) -> (Self, HubHandle) {
        let (events_tx, events) = mpsc::channel(INTAKE_CAPACITY);

        let hub = Self {
            tables: tables.clone(),
            connections: HashMap::new(),
            events,
            updates_applied: 0,
            evictions: 0,
        };
        let handle = HubHandle {
            events: events_tx,
            tables,
            next_connection_id: Arc::new(AtomicUsize::new(1)),
        };
        (hub, handle)
    }

    /// Processes events until every [`HubHandle`] has been dropped.
    pub async fn run(mut self) {
        debug!("Hub started");
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Update(update) => self.apply_update(update),
                HubEvent::Register(connection) => {
                    debug!(connection_id = connection.id, "Connection registered");
                    self.connections.insert(connection.id, connection);
                }
                HubEvent::Unregister(id) => {
                    if self.connections.remove(&id).is_some() {
                        debug!(connection_id = id, "Connection unregistered");
                    }
                }
                HubEvent::Stats(reply) => {
                    let _ = reply.send(self.stats());
                }
            }
        }
        debug!("Hub stopped, all handles dropped");
    }

    fn apply_update(&mut self, update: RoomEntities) {
        let state = Arc::new(RoomState::from(update));
        let room_id = state.room_id;
        trace!(%room_id, time = state.time, "Applying room update");

        self.tables.store_entities(state.clone());
        self.updates_applied += 1;

        let mut unresponsive = Vec::new();
        for (id, connection) in &self.connections {
            if !connection.is_subscribed(&room_id) {
                continue;
            }
            match connection.try_deliver(state.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    info!(connection_id = id, %room_id, "Failed to send state to client, closing connection");
                    unresponsive.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(connection_id = id, "Delivery queue already closed, dropping connection");
                    unresponsive.push(*id);
                }
            }
        }

        for id in unresponsive {
            // Dropping the handle drops the queue's only sender.
            self.connections.remove(&id);
            self.evictions += 1;
        }
    }

    fn stats(&self) -> HubStats {
        HubStats {
            connections: self.connections.len(),
            rooms: self.tables.room_count(),
            terrain_rooms: self.tables.terrain_count(),
            updates_applied: self.updates_applied,
            evictions: self.evictions,
        }
    }
}

impl HubHandle {
    pub fn tables(&self) -> &Arc<RegionTables> {
        &self.tables
    }

    pub fn allocate_connection_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Hands an upstream batch to the hub, waiting while the hub is busy.
    pub async fn submit(&self, update: RoomEntities) -> Result<(), HubClosed> {
        self.send(HubEvent::Update(update)).await
    }

    pub async fn register(&self, connection: ConnectionHandle) -> Result<(), HubClosed> {
        self.send(HubEvent::Register(connection)).await
    }

    /// Removes a connection; unknown ids are ignored by the hub.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubClosed> {
        self.send(HubEvent::Unregister(id)).await
    }

    /// Counters as of the moment the hub reaches this request.
    pub async fn stats(&self) -> Result<HubStats, HubClosed> {
        let (reply, response) = oneshot::channel();
        self.send(HubEvent::Stats(reply)).await?;
        response.await.map_err(|_| HubClosed)
    }

    async fn send(&self, event: HubEvent) -> Result<(), HubClosed> {
        self.events.send(event).await.map_err(|_| HubClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionLimits;
    use crate::connection::{connection_pair, ConnectionChannels};
    use crate::region::RoomId;
    use serde_json::json;

    fn spawn_hub() -> HubHandle {
        let (hub, handle) = Hub::new(Arc::new(RegionTables::new()));
        tokio::spawn(hub.run());
        handle
    }

    fn update(room_id: RoomId, time: i64, bot: i64) -> RoomEntities {
        RoomEntities {
            world_time: time,
            room_id,
            bots: vec![json!({ "id": bot })],
            structures: Vec::new(),
            resources: Vec::new(),
        }
    }

    async fn subscribe(channels: &ConnectionChannels, room_id: RoomId) {
        channels.subscriptions.write().try_add(room_id).unwrap();
    }

    async fn connect(hub: &HubHandle, limits: &ConnectionLimits) -> ConnectionChannels {
        let (handle, channels) = connection_pair(hub.allocate_connection_id(), limits);
        hub.register(handle).await.unwrap();
        channels
    }

    #[tokio::test]
    async fn updates_reach_only_subscribed_connections_in_order() {
        let hub = spawn_hub();
        let limits = ConnectionLimits::default();
        let room = RoomId::new(1, 1);

        let mut subscribed = connect(&hub, &limits).await;
        let mut other = connect(&hub, &limits).await;
        subscribe(&subscribed, room).await;
        subscribe(&other, RoomId::new(9, 9)).await;

        for tick in 1..=5 {
            hub.submit(update(room, tick, tick)).await.unwrap();
        }
        // Events are handled in order, so the reply follows every earlier update.
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.updates_applied, 5);

        for tick in 1..=5 {
            let state = subscribed.deliveries_rx.recv().await.unwrap();
            assert_eq!(state.time, tick);
        }
        assert!(other.deliveries_rx.try_recv().is_err());
        assert_eq!(hub.tables().entities(&room).unwrap().time, 5);
    }

    #[tokio::test]
    async fn duplicate_subscription_receives_one_copy() {
        let hub = spawn_hub();
        let room = RoomId::new(0, 0);
        let mut channels = connect(&hub, &ConnectionLimits::default()).await;
        subscribe(&channels, room).await;
        subscribe(&channels, room).await;

        hub.submit(update(room, 1, 1)).await.unwrap();
        hub.stats().await.unwrap();

        assert!(channels.deliveries_rx.try_recv().is_ok());
        assert!(channels.deliveries_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn full_queue_evicts_only_the_slow_connection() {
        let hub = spawn_hub();
        let room = RoomId::new(2, 2);
        let limits = ConnectionLimits {
            delivery_queue_capacity: 2,
            ..Default::default()
        };

        let mut slow = connect(&hub, &limits).await;
        let mut fast = connect(&hub, &limits).await;
        subscribe(&slow, room).await;
        subscribe(&fast, room).await;

        for tick in 1..=3 {
            hub.submit(update(room, tick, tick)).await.unwrap();
            // The fast consumer keeps up.
            hub.stats().await.unwrap();
            assert_eq!(fast.deliveries_rx.recv().await.unwrap().time, tick);
        }

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.connections, 1);

        // The slow queue drains what it held, then reports closed.
        assert_eq!(slow.deliveries_rx.recv().await.unwrap().time, 1);
        assert_eq!(slow.deliveries_rx.recv().await.unwrap().time, 2);
        assert!(slow.deliveries_rx.recv().await.is_none());

        hub.submit(update(room, 4, 4)).await.unwrap();
        assert_eq!(fast.deliveries_rx.recv().await.unwrap().time, 4);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let hub = spawn_hub();
        let (handle, mut channels) = connection_pair(hub.allocate_connection_id(), &ConnectionLimits::default());
        let id = handle.id;
        hub.register(handle).await.unwrap();

        hub.unregister(id).await.unwrap();
        hub.unregister(id).await.unwrap();
        hub.unregister(id + 100).await.unwrap();

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 0);
        assert!(channels.deliveries_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn later_update_replaces_entity_lists() {
        let hub = spawn_hub();
        let room = RoomId::new(1, 1);
        let mut channels = connect(&hub, &ConnectionLimits::default()).await;
        subscribe(&channels, room).await;

        let mut first = update(room, 5, 1);
        first.structures = vec![json!({ "id": "spawn" })];
        hub.submit(first).await.unwrap();
        hub.submit(update(room, 6, 2)).await.unwrap();
        hub.stats().await.unwrap();

        channels.deliveries_rx.recv().await.unwrap();
        let latest = channels.deliveries_rx.recv().await.unwrap();
        assert_eq!(latest.time, 6);
        assert_eq!(latest.bots, vec![json!({ "id": 2 })]);
        assert!(latest.structures.is_empty());
    }
}
