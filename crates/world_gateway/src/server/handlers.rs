//! Per-socket handling: health probe, websocket upgrade and connection pumps.

use crate::config::ConnectionLimits;
use crate::connection::{
    connection_pair, run_inbound, run_outbound, ConnectionChannels, InboundPump, OutboundPump,
};
use crate::error::ServerError;
use crate::hub::HubHandle;
use futures::StreamExt;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::accept_hdr_async_with_config;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{debug, info, trace};

/// Time allowed for a client to send its request line.
const REQUEST_LINE_TIMEOUT: Duration = Duration::from_secs(10);

const MAX_PEEK_DELAY: Duration = Duration::from_millis(50);

const HEALTH_RESPONSE: &[u8] = b"HTTP/1.1 204 No Content\r\nConnection: close\r\n\r\n";

/// State shared by every connection handler.
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    pub hub: HubHandle,
    pub limits: ConnectionLimits,
    pub stream_path: String,
    pub health_path: String,
}

/// Serves one accepted socket until it closes.
///
/// Health probes are answered directly. Everything else goes through the
/// websocket handshake, which rejects paths other than the stream path with
/// `404 Not Found`.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    ctx: ConnectionContext,
) -> Result<(), ServerError> {
    let path = peek_request_path(&stream).await?;
    if path.as_deref() == Some(ctx.health_path.as_str()) {
        return answer_health(stream).await;
    }

    let config = WebSocketConfig::default().max_message_size(Some(ctx.limits.max_message_size));
    let stream_path = ctx.stream_path.clone();
    let route = move |request: &Request, response: Response| {
        if request.uri().path() == stream_path {
            Ok(response)
        } else {
            let mut not_found = ErrorResponse::new(Some("not found".to_string()));
            *not_found.status_mut() = StatusCode::NOT_FOUND;
            Err(not_found)
        }
    };
    let ws_stream = accept_hdr_async_with_config(stream, route, Some(config))
        .await
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (handle, channels) = connection_pair(ctx.hub.allocate_connection_id(), &ctx.limits);
    let connection_id = handle.id;
    ctx.hub
        .register(handle)
        .await
        .map_err(|e| ServerError::Internal(e.to_string()))?;
    info!(connection_id, %addr, "Client connected");

    let ConnectionChannels {
        subscriptions,
        bootstrap_tx,
        bootstrap_rx,
        deliveries_rx,
    } = channels;
    let (sink, source) = ws_stream.split();

    let outbound = OutboundPump {
        connection_id,
        tables: ctx.hub.tables().clone(),
        bootstrap: bootstrap_rx,
        deliveries: deliveries_rx,
        write_timeout: ctx.limits.write_timeout(),
        ping_interval: ctx.limits.ping_interval(),
    };
    let mut outbound_task = tokio::spawn(run_outbound(sink, outbound));

    let inbound = InboundPump::new(connection_id, subscriptions, bootstrap_tx);
    tokio::select! {
        exit = run_inbound(source, inbound, ctx.limits.read_timeout()) => {
            debug!(connection_id, ?exit, "Inbound pump stopped");
            // Dropping the bootstrap sender stops the outbound pump.
            let _ = tokio::time::timeout(ctx.limits.write_timeout(), &mut outbound_task).await;
            outbound_task.abort();
        }
        exit = &mut outbound_task => {
            debug!(connection_id, ?exit, "Outbound pump stopped");
        }
    }

    // Eviction may already have removed it; unregistering is idempotent.
    let _ = ctx.hub.unregister(connection_id).await;
    info!(connection_id, %addr, "Client disconnected");
    Ok(())
}

/// Returns the path of the request line once it has arrived, without
/// consuming any bytes from the socket.
///
/// `peek` leaves read readiness set while bytes are buffered, so waiting on
/// `readable()` would return at once for a partial line. A partial line is
/// instead re-peeked after a delay that grows from 1ms to 50ms.
async fn peek_request_path(stream: &TcpStream) -> Result<Option<String>, ServerError> {
    let deadline = Instant::now() + REQUEST_LINE_TIMEOUT;
    let mut buf = [0u8; 1024];
    let mut poll_delay = Duration::from_millis(1);
    loop {
        let n = tokio::time::timeout_at(deadline, stream.peek(&mut buf))
            .await
            .map_err(|_| ServerError::Network("timed out waiting for request line".to_string()))?
            .map_err(|e| ServerError::Network(format!("failed to read request: {e}")))?;
        if n == 0 {
            return Err(ServerError::Network("connection closed before request".to_string()));
        }

        let head = &buf[..n];
        if let Some(end) = head.windows(2).position(|w| w == b"\r\n") {
            return Ok(parse_request_path(&head[..end]));
        }
        if n == buf.len() {
            return Ok(None);
        }
        // Only part of the request line is buffered so far.
        tokio::time::sleep(poll_delay).await;
        poll_delay = (poll_delay * 2).min(MAX_PEEK_DELAY);
        if Instant::now() >= deadline {
            return Err(ServerError::Network("timed out waiting for request line".to_string()));
        }
    }
}

/// `GET /health?x=1 HTTP/1.1` -> `/health`
fn parse_request_path(line: &[u8]) -> Option<String> {
    let line = std::str::from_utf8(line).ok()?;
    let mut parts = line.split_whitespace();
    let _method = parts.next()?;
    let target = parts.next()?;
    let path = target.split('?').next().unwrap_or(target);
    Some(path.to_string())
}

async fn answer_health(mut stream: TcpStream) -> Result<(), ServerError> {
    let mut discard = [0u8; 1024];
    let _ = stream.read(&mut discard).await;
    stream
        .write_all(HEALTH_RESPONSE)
        .await
        .map_err(|e| ServerError::Network(format!("failed to answer health probe: {e}")))?;
    let _ = stream.shutdown().await;
    trace!("Health probe answered");
    Ok(())
}
