//! Inbound pump: subscriber control messages to subscription changes.
//!
//! The pump is the only writer of its connection's subscription set. Every
//! room that is newly subscribed is forwarded to the outbound pump as a
//! bootstrap request so that the subscriber first receives the room's terrain
//! and current entities.

use super::subscription::SharedSubscriptions;
use super::ConnectionId;
use crate::messaging::{ClientMessage, SubscriptionCommand};
use crate::region::RoomId;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Why the inbound pump stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundExit {
    /// The subscriber closed the connection or the stream ended
    Closed,
    /// No pong arrived within the read deadline
    ReadTimeout,
    /// A message did not match the control message schema
    Malformed(String),
    /// Reading from the transport failed
    Transport(String),
    /// The outbound pump is gone, so bootstrap requests cannot be delivered
    OutboundGone,
}

/// Applies control messages to one connection's subscription set.
#[derive(Debug)]
pub struct InboundPump {
    connection_id: ConnectionId,
    subscriptions: SharedSubscriptions,
    bootstrap: mpsc::Sender<RoomId>,
}

impl InboundPump {
    pub fn new(
        connection_id: ConnectionId,
        subscriptions: SharedSubscriptions,
        bootstrap: mpsc::Sender<RoomId>,
    ) -> Self {
        Self {
            connection_id,
            subscriptions,
            bootstrap,
        }
    }

    /// Applies one parsed message.
    ///
    /// Rejections (capacity, unknown `ty`) are logged and leave the connection
    /// open. Fails only when the outbound pump can no longer take bootstrap
    /// requests.
    pub async fn handle_message(&self, message: ClientMessage) -> Result<(), InboundExit> {
        let id = self.connection_id;
        let Some(command) = message.clone().into_command() else {
            warn!(connection_id = id, ty = %message.ty, "Unhandled msg type");
            return Ok(());
        };

        let added = {
            let mut subscriptions = self.subscriptions.write();
            match command {
                SubscriptionCommand::Subscribe(room_id) => match subscriptions.try_add(room_id) {
                    Ok(()) => {
                        debug!(connection_id = id, %room_id, "Client subscribed");
                        vec![room_id]
                    }
                    Err(e) => {
                        debug!(connection_id = id, "Client is listening to too many rooms: {e}");
                        Vec::new()
                    }
                },
                SubscriptionCommand::SubscribeMany(room_ids) => {
                    match subscriptions.try_add_all(&room_ids) {
                        Ok(()) => {
                            debug!(connection_id = id, rooms = ?room_ids, "Client subscribed");
                            room_ids
                        }
                        Err(e) => {
                            debug!(connection_id = id, "Client is listening to too many rooms: {e}");
                            Vec::new()
                        }
                    }
                }
                SubscriptionCommand::Unsubscribe(room_id) => {
                    debug!(connection_id = id, %room_id, "Client unsubscribed");
                    subscriptions.remove(&room_id);
                    Vec::new()
                }
                SubscriptionCommand::UnsubscribeMany(room_ids) => {
                    debug!(connection_id = id, rooms = ?room_ids, "Client unsubscribed");
                    for room_id in &room_ids {
                        subscriptions.remove(room_id);
                    }
                    Vec::new()
                }
                SubscriptionCommand::Clear => {
                    debug!(connection_id = id, "Client cleared their room subs");
                    subscriptions.clear();
                    Vec::new()
                }
            }
        };

        // The lock is released before waiting on the outbound pump.
        for room_id in added {
            self.bootstrap
                .send(room_id)
                .await
                .map_err(|_| InboundExit::OutboundGone)?;
        }
        Ok(())
    }
}

/// Reads control messages until the subscriber goes away.
///
/// The read deadline starts at `read_timeout` and is pushed back only when a
/// pong arrives; ordinary messages do not extend it.
pub async fn run_inbound<S, E>(mut stream: S, pump: InboundPump, read_timeout: Duration) -> InboundExit
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let id = pump.connection_id;
    let mut deadline = Instant::now() + read_timeout;

    loop {
        let message = match timeout_at(deadline, stream.next()).await {
            Err(_) => {
                info!(connection_id = id, "Client going away: read deadline exceeded");
                return InboundExit::ReadTimeout;
            }
            Ok(None) => {
                info!(connection_id = id, "Client going away: stream ended");
                return InboundExit::Closed;
            }
            Ok(Some(Err(e))) => {
                info!(connection_id = id, "Client going away: {e}");
                return InboundExit::Transport(e.to_string());
            }
            Ok(Some(Ok(message))) => message,
        };

        let parsed = match message {
            Message::Text(text) => serde_json::from_str::<ClientMessage>(text.as_str()),
            Message::Binary(data) => serde_json::from_slice::<ClientMessage>(&data),
            Message::Pong(_) => {
                deadline = Instant::now() + read_timeout;
                continue;
            }
            Message::Close(_) => {
                info!(connection_id = id, "Client going away: close frame");
                return InboundExit::Closed;
            }
            _ => continue,
        };

        match parsed {
            Ok(message) => {
                debug!(connection_id = id, ty = %message.ty, "Incoming message");
                if let Err(exit) = pump.handle_message(message).await {
                    return exit;
                }
            }
            Err(e) => {
                warn!(connection_id = id, "Invalid message: {e}");
                return InboundExit::Malformed(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SubscriptionSet;
    use futures::stream;
    use std::collections::HashSet;

    fn pump(capacity: usize) -> (InboundPump, SharedSubscriptions, mpsc::Receiver<RoomId>) {
        let subscriptions = SubscriptionSet::shared(capacity);
        let (tx, rx) = mpsc::channel(128);
        (InboundPump::new(1, subscriptions.clone(), tx), subscriptions, rx)
    }

    fn text(raw: &str) -> Result<Message, String> {
        Ok(Message::text(raw.to_string()))
    }

    fn drain(rx: &mut mpsc::Receiver<RoomId>) -> Vec<RoomId> {
        let mut out = Vec::new();
        while let Ok(room_id) = rx.try_recv() {
            out.push(room_id);
        }
        out
    }

    #[tokio::test]
    async fn subscribe_requests_bootstrap_for_each_added_room() {
        let (pump, subscriptions, mut bootstrap) = pump(100);
        let messages = stream::iter(vec![
            text(r#"{"ty":"room_id","room_id":{"q":0,"r":0}}"#),
            text(r#"{"ty":"room_ids","room_ids":[{"q":1,"r":0},{"q":2,"r":0}]}"#),
        ]);

        let exit = run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::Closed);
        assert_eq!(
            drain(&mut bootstrap),
            vec![RoomId::new(0, 0), RoomId::new(1, 0), RoomId::new(2, 0)]
        );
        assert_eq!(subscriptions.read().len(), 3);
    }

    #[tokio::test]
    async fn batch_over_capacity_is_skipped_and_connection_stays_open() {
        let (pump, subscriptions, mut bootstrap) = pump(3);
        let messages = stream::iter(vec![
            text(r#"{"ty":"room_ids","room_ids":[{"q":1,"r":0},{"q":2,"r":0}]}"#),
            text(r#"{"ty":"room_ids","room_ids":[{"q":3,"r":0},{"q":4,"r":0}]}"#),
            text(r#"{"ty":"room_id","room_id":{"q":5,"r":0}}"#),
            text(r#"{"ty":"room_id","room_id":{"q":6,"r":0}}"#),
        ]);

        let exit = run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::Closed);
        assert_eq!(
            drain(&mut bootstrap),
            vec![RoomId::new(1, 0), RoomId::new(2, 0), RoomId::new(5, 0)]
        );
        let subscriptions = subscriptions.read();
        assert_eq!(subscriptions.len(), 3);
        assert!(!subscriptions.contains(&RoomId::new(3, 0)));
    }

    #[tokio::test]
    async fn unsubscribe_and_clear_do_not_request_bootstrap() {
        let (pump, subscriptions, mut bootstrap) = pump(100);
        let messages = stream::iter(vec![
            text(r#"{"ty":"room_ids","room_ids":[{"q":1,"r":0},{"q":2,"r":0},{"q":3,"r":0}]}"#),
            text(r#"{"ty":"unsubscribe_room_id","room_id":{"q":2,"r":0}}"#),
            text(r#"{"ty":"unsubscribe_room_id","room_id":{"q":42,"r":42}}"#),
            text(r#"{"ty":"unsubscribe_room_ids","room_ids":[{"q":1,"r":0}]}"#),
        ]);

        run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert_eq!(drain(&mut bootstrap).len(), 3);
        let rooms: HashSet<RoomId> = subscriptions.read().rooms().copied().collect();
        assert_eq!(rooms, HashSet::from([RoomId::new(3, 0)]));
    }

    #[tokio::test]
    async fn clear_then_subscribe_keeps_only_new_rooms() {
        let (pump, subscriptions, _bootstrap) = pump(100);
        let messages = stream::iter(vec![
            text(r#"{"ty":"room_ids","room_ids":[{"q":1,"r":0},{"q":2,"r":0}]}"#),
            text(r#"{"ty":"clear_room_ids"}"#),
            text(r#"{"ty":"room_id","room_id":{"q":7,"r":-7}}"#),
        ]);

        run_inbound(messages, pump, Duration::from_secs(60)).await;

        let rooms: HashSet<RoomId> = subscriptions.read().rooms().copied().collect();
        assert_eq!(rooms, HashSet::from([RoomId::new(7, -7)]));
    }

    #[tokio::test]
    async fn unknown_tag_is_ignored_but_malformed_input_ends_the_loop() {
        let (pump, subscriptions, _bootstrap) = pump(100);
        let messages = stream::iter(vec![
            text(r#"{"ty":"warp_drive"}"#),
            text(r#"{"ty":"room_id","room_id":{"q":1,"r":1}}"#),
            text(r#"{"ty":"room_id","room_id":[1,1]"#),
            text(r#"{"ty":"room_id","room_id":{"q":2,"r":2}}"#),
        ]);

        let exit = run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert!(matches!(exit, InboundExit::Malformed(_)));
        let subscriptions = subscriptions.read();
        assert!(subscriptions.contains(&RoomId::new(1, 1)));
        assert!(!subscriptions.contains(&RoomId::new(2, 2)));
    }

    #[tokio::test]
    async fn transport_error_ends_the_loop() {
        let (pump, _subscriptions, _bootstrap) = pump(100);
        let messages = stream::iter(vec![Err::<Message, String>("connection reset".to_string())]);

        let exit = run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::Transport("connection reset".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_the_read_deadline_times_out() {
        let (pump, _subscriptions, _bootstrap) = pump(100);
        let started = Instant::now();

        let exit = run_inbound(stream::pending::<Result<Message, String>>(), pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::ReadTimeout);
        assert!(started.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pong_extends_the_read_deadline() {
        let (pump, _subscriptions, _bootstrap) = pump(100);
        let started = Instant::now();
        let pong_then_silence = stream::once(async {
            tokio::time::sleep(Duration::from_secs(45)).await;
            Ok::<Message, String>(Message::Pong(Default::default()))
        })
        .chain(stream::pending());

        let exit = run_inbound(Box::pin(pong_then_silence), pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::ReadTimeout);
        assert!(started.elapsed() >= Duration::from_secs(105));
    }

    #[tokio::test]
    async fn closed_outbound_ends_the_loop() {
        let (pump, _subscriptions, bootstrap) = pump(100);
        drop(bootstrap);
        let messages = stream::iter(vec![text(r#"{"ty":"room_id","room_id":{"q":0,"r":0}}"#)]);

        let exit = run_inbound(messages, pump, Duration::from_secs(60)).await;

        assert_eq!(exit, InboundExit::OutboundGone);
    }
}
