//! [`WorldSource`] over the simulation's JSON websocket API.
//!
//! | call            | endpoint                         | reply                               |
//! |-----------------|----------------------------------|-------------------------------------|
//! | `entities`      | `ws://<target>/entities`         | one `RoomEntities` frame per batch  |
//! | `room_list`     | `ws://<target>/rooms`            | `{"rooms":[{"room_id":{q,r}},..]}`  |
//! | `room_terrain`  | `ws://<target>/room-terrain?q&r` | one terrain object                  |

use super::{EntityStream, UpstreamChannel, WorldSource};
use crate::error::UpstreamError;
use crate::region::{RoomEntities, RoomId, RoomTerrain};
use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::trace;

#[derive(Debug, Deserialize)]
struct RoomList {
    #[serde(default)]
    rooms: Vec<RoomListEntry>,
}

#[derive(Debug, Deserialize)]
struct RoomListEntry {
    room_id: RoomId,
}

/// Client for a simulation reached through a ready [`UpstreamChannel`].
#[derive(Debug)]
pub struct WsWorldClient {
    base_url: String,
    _channel: UpstreamChannel,
}

impl WsWorldClient {
    pub fn new(channel: UpstreamChannel) -> Self {
        Self {
            base_url: format!("ws://{}", channel.target()),
            _channel: channel,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Opens `path`, decodes the first data frame and closes the socket.
    async fn unary<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let (mut socket, _) = connect_async(self.url(path)).await?;

        while let Some(message) = socket.next().await {
            let reply = match message? {
                Message::Text(text) => serde_json::from_str(text.as_str())?,
                Message::Binary(data) => serde_json::from_slice(&data)?,
                Message::Close(_) => break,
                _ => continue,
            };
            let _ = socket.close(None).await;
            return Ok(reply);
        }
        Err(UpstreamError::NoReply(path.to_string()))
    }
}

fn decode_batch(message: Result<Message, tokio_tungstenite::tungstenite::Error>) -> Option<Result<RoomEntities, UpstreamError>> {
    match message {
        Ok(Message::Text(text)) => Some(serde_json::from_str(text.as_str()).map_err(UpstreamError::from)),
        Ok(Message::Binary(data)) => Some(serde_json::from_slice(&data).map_err(UpstreamError::from)),
        Ok(_) => None,
        Err(e) => Some(Err(UpstreamError::from(e))),
    }
}

#[async_trait]
impl WorldSource for WsWorldClient {
    async fn entities(&self) -> Result<EntityStream, UpstreamError> {
        let (socket, _) = connect_async(self.url("/entities")).await?;
        trace!(url = %self.url("/entities"), "Entity feed opened");
        Ok(socket
            .filter_map(|message| futures::future::ready(decode_batch(message)))
            .boxed())
    }

    async fn room_list(&self) -> Result<Vec<RoomId>, UpstreamError> {
        let list: RoomList = self.unary("/rooms").await?;
        Ok(list.rooms.into_iter().map(|entry| entry.room_id).collect())
    }

    async fn room_terrain(&self, room_id: RoomId) -> Result<RoomTerrain, UpstreamError> {
        self.unary(&format!("/room-terrain?q={}&r={}", room_id.q, room_id.r))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::DialPolicy;
    use futures::SinkExt;
    use serde_json::json;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    /// A fake simulation answering by request path.
    async fn fake_simulation() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut path = String::new();
                    let callback = |request: &Request, response: Response| {
                        path = request.uri().to_string();
                        Ok::<_, ErrorResponse>(response)
                    };
                    let Ok(mut socket) = accept_hdr_async(stream, callback).await else {
                        return;
                    };
                    let frames = match path.as_str() {
                        "/rooms" => vec![json!({ "rooms": [{ "room_id": { "q": 0, "r": 0 } }, { "room_id": { "q": 1, "r": -1 } }] })],
                        "/room-terrain?q=1&r=-1" => vec![json!({ "room_id": { "q": 1, "r": -1 }, "tiles": ["plain", "wall"] })],
                        "/entities" => vec![
                            json!({ "worldTime": 5, "roomId": { "q": 0, "r": 0 }, "bots": [{ "id": 1 }] }),
                            json!({ "worldTime": 6, "roomId": { "q": 0, "r": 0 }, "bots": [] }),
                        ],
                        _ => Vec::new(),
                    };
                    for frame in frames {
                        if socket.send(Message::text(frame.to_string())).await.is_err() {
                            return;
                        }
                    }
                    let _ = socket.close(None).await;
                    while let Some(Ok(_)) = socket.next().await {}
                });
            }
        });
        target
    }

    async fn client() -> WsWorldClient {
        let target = fake_simulation().await;
        WsWorldClient::new(UpstreamChannel::dial(&target, DialPolicy::default()).unwrap())
    }

    #[tokio::test]
    async fn room_list_and_terrain_are_decoded() {
        let client = client().await;

        let rooms = client.room_list().await.unwrap();
        assert_eq!(rooms, vec![RoomId::new(0, 0), RoomId::new(1, -1)]);

        let terrain = client.room_terrain(RoomId::new(1, -1)).await.unwrap();
        assert_eq!(terrain.room_id, RoomId::new(1, -1));
        assert_eq!(terrain.data["tiles"], json!(["plain", "wall"]));
    }

    #[tokio::test]
    async fn entity_feed_yields_batches_then_ends() {
        let client = client().await;

        let batches: Vec<RoomEntities> = client
            .entities()
            .await
            .unwrap()
            .map(|batch| batch.unwrap())
            .collect()
            .await;

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].world_time, 5);
        assert_eq!(batches[0].bots, vec![json!({ "id": 1 })]);
        assert!(batches[1].bots.is_empty());
    }

    #[tokio::test]
    async fn unary_call_without_reply_is_an_error() {
        let client = client().await;

        let err = client.room_terrain(RoomId::new(9, 9)).await.unwrap_err();

        assert!(matches!(err, UpstreamError::NoReply(_)));
    }
}
