//! Subscriber connection state and pumps.
//!
//! Each connection owns two loops: the inbound pump, which applies control
//! messages to the connection's subscription set, and the outbound pump, which
//! writes bootstrap data, hub updates and keepalives to the socket. The two
//! loops only talk through the bootstrap request queue.

pub mod inbound;
pub mod outbound;
pub mod subscription;

pub use inbound::{run_inbound, InboundExit, InboundPump};
pub use outbound::{run_outbound, OutboundExit, OutboundPump};
pub use subscription::{SharedSubscriptions, SubscriptionError, SubscriptionSet};

use crate::config::ConnectionLimits;
use crate::region::{RoomId, RoomState};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Type alias for connection identifiers.
///
/// Connection IDs are allocated by the hub handle and are unique for the
/// lifetime of the process.
pub type ConnectionId = usize;

/// The hub's view of a registered connection.
///
/// Holds the only sender of the connection's delivery queue: when the hub
/// drops the handle, the outbound pump sees the queue close and terminates.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    subscriptions: SharedSubscriptions,
    deliveries: mpsc::Sender<Arc<RoomState>>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        subscriptions: SharedSubscriptions,
        deliveries: mpsc::Sender<Arc<RoomState>>,
    ) -> Self {
        Self {
            id,
            subscriptions,
            deliveries,
        }
    }

    pub fn is_subscribed(&self, room_id: &RoomId) -> bool {
        self.subscriptions.read().contains(room_id)
    }

    /// Queues a snapshot without waiting for capacity.
    pub fn try_deliver(
        &self,
        state: Arc<RoomState>,
    ) -> Result<(), mpsc::error::TrySendError<Arc<RoomState>>> {
        self.deliveries.try_send(state)
    }
}

/// Receiving halves and shared state handed to a connection's pumps.
pub struct ConnectionChannels {
    pub subscriptions: SharedSubscriptions,
    pub bootstrap_tx: mpsc::Sender<RoomId>,
    pub bootstrap_rx: mpsc::Receiver<RoomId>,
    pub deliveries_rx: mpsc::Receiver<Arc<RoomState>>,
}

/// Creates the hub handle and the pump-side channels for a new connection.
pub fn connection_pair(
    id: ConnectionId,
    limits: &ConnectionLimits,
) -> (ConnectionHandle, ConnectionChannels) {
    let subscriptions = SubscriptionSet::shared(limits.max_subscriptions);
    let (deliveries_tx, deliveries_rx) = mpsc::channel(limits.delivery_queue_capacity);
    let (bootstrap_tx, bootstrap_rx) = mpsc::channel(limits.bootstrap_queue_capacity);

    let handle = ConnectionHandle::new(id, subscriptions.clone(), deliveries_tx);
    let channels = ConnectionChannels {
        subscriptions,
        bootstrap_tx,
        bootstrap_rx,
        deliveries_rx,
    };
    (handle, channels)
}
