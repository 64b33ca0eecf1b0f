//! Upstream reader: forwards the simulation's entity feed into the hub.

use super::{EntityStream, ReconnectBackoff, WorldSource};
use crate::error::UpstreamError;
use crate::hub::HubHandle;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Reads entity batches and hands them to the hub one at a time.
///
/// A stream error reopens the subscription immediately. If that reopen fails
/// (the simulation is restarting, say), further attempts follow `backoff`
/// until one succeeds. Only failing to open the very first subscription is an
/// error. Returns `Ok(())` when the simulation ends the feed gracefully or
/// when the hub is gone.
///
/// Handing a batch to the hub waits while the hub is busy, so a slow hub
/// slows down consumption of the upstream feed rather than buffering it.
pub async fn listen_to_world(
    source: Arc<dyn WorldSource>,
    hub: HubHandle,
    backoff: ReconnectBackoff,
) -> Result<(), UpstreamError> {
    let mut stream = source.entities().await?;
    loop {
        debug!("Subscribed to the entity feed");

        loop {
            match stream.next().await {
                Some(Ok(batch)) => {
                    if hub.submit(batch).await.is_err() {
                        info!("Hub stopped, no longer reading the entity feed");
                        return Ok(());
                    }
                }
                Some(Err(e)) => {
                    warn!("Error reading the entity feed: {e}");
                    break;
                }
                None => {
                    info!("Entity feed ended");
                    return Ok(());
                }
            }
        }
        warn!("Retrying connection");
        stream = resubscribe(source.as_ref(), backoff.clone()).await;
    }
}

async fn resubscribe(source: &dyn WorldSource, mut backoff: ReconnectBackoff) -> EntityStream {
    loop {
        match source.entities().await {
            Ok(stream) => return stream,
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(backoff_ms = delay.as_millis() as u64, "Failed to resubscribe to the entity feed: {e}");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
