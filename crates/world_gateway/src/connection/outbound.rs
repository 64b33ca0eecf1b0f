//! Outbound pump: bootstrap data, hub updates and keepalives to the socket.

use super::ConnectionId;
use crate::hub::RegionTables;
use crate::messaging::ServerMessage;
use crate::region::{RoomId, RoomState};
use futures::{Sink, SinkExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

/// Why the outbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundExit {
    /// The hub closed the delivery queue
    Evicted,
    /// The inbound side went away and will send no more bootstrap requests
    InboundGone,
    /// A write did not complete within the write deadline
    WriteTimeout,
    /// The transport rejected a write
    WriteFailed(String),
}

/// Everything the outbound pump reads from.
pub struct OutboundPump {
    pub connection_id: ConnectionId,
    pub tables: Arc<RegionTables>,
    pub bootstrap: mpsc::Receiver<RoomId>,
    pub deliveries: mpsc::Receiver<Arc<RoomState>>,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
}

/// Writes to `sink` until the delivery queue closes or a write fails, then
/// closes the sink.
///
/// Keepalive pings go out on a fixed period regardless of other traffic; the
/// peer's pongs are what keep the inbound read deadline alive.
pub async fn run_outbound<W>(mut sink: W, mut pump: OutboundPump) -> OutboundExit
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let id = pump.connection_id;
    let mut ticker = interval_at(Instant::now() + pump.ping_interval, pump.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let exit = loop {
        let written = tokio::select! {
            request = pump.bootstrap.recv() => match request {
                Some(room_id) => send_bootstrap(&mut sink, &pump, room_id).await,
                None => break OutboundExit::InboundGone,
            },
            delivery = pump.deliveries.recv() => match delivery {
                Some(state) => {
                    trace!(connection_id = id, room_id = %state.room_id, time = state.time, "Sending room state");
                    send_frame(&mut sink, ServerMessage::Entities(&state), pump.write_timeout).await
                }
                None => {
                    info!(connection_id = id, "Delivery queue closed by hub");
                    break OutboundExit::Evicted;
                }
            },
            _ = ticker.tick() => {
                trace!(connection_id = id, "Sending ping");
                write(&mut sink, Message::Ping(Default::default()), pump.write_timeout).await
            }
        };

        if let Err(exit) = written {
            info!(connection_id = id, ?exit, "Failed to write to client");
            break exit;
        }
    };

    if let Err(e) = timeout(pump.write_timeout, sink.close()).await.unwrap_or(Ok(())) {
        debug!(connection_id = id, "Error closing connection: {e}");
    }
    exit
}

/// Sends the room's terrain, then its current entities if any. Rooms without
/// terrain are skipped entirely.
async fn send_bootstrap<W>(sink: &mut W, pump: &OutboundPump, room_id: RoomId) -> Result<(), OutboundExit>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let Some(terrain) = pump.tables.terrain(&room_id) else {
        debug!(connection_id = pump.connection_id, %room_id, "No terrain for room, skipping bootstrap");
        return Ok(());
    };
    send_frame(sink, ServerMessage::Terrain(&terrain), pump.write_timeout).await?;

    if let Some(state) = pump.tables.entities(&room_id) {
        send_frame(sink, ServerMessage::Entities(&state), pump.write_timeout).await?;
    }
    Ok(())
}

async fn send_frame<W>(sink: &mut W, frame: ServerMessage<'_>, deadline: Duration) -> Result<(), OutboundExit>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let text = match serde_json::to_string(&frame) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize outbound frame: {e}");
            return Ok(());
        }
    };
    write(sink, Message::text(text), deadline).await
}

async fn write<W>(sink: &mut W, message: Message, deadline: Duration) -> Result<(), OutboundExit>
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    match timeout(deadline, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(OutboundExit::WriteFailed(e.to_string())),
        Err(_) => Err(OutboundExit::WriteTimeout),
    }
}
