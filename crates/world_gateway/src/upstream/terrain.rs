//! Terrain bootstrap: fetch every room's static terrain before serving.

use super::WorldSource;
use crate::error::UpstreamError;
use crate::hub::RegionTables;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Fetches the room list, then the terrain of every room concurrently, and
/// stores the results in `tables`.
///
/// One task is spawned per room. The first failure aborts the bootstrap; the
/// gateway must not serve with partial terrain. Returns the number of rooms
/// loaded.
pub async fn init_terrain(source: Arc<dyn WorldSource>, tables: &RegionTables) -> Result<usize, UpstreamError> {
    let rooms = source.room_list().await?;
    debug!(rooms = rooms.len(), "Fetching room terrain");

    let mut fetches: FuturesUnordered<_> = rooms
        .into_iter()
        .map(|room_id| {
            let source = source.clone();
            let task = tokio::spawn(async move { source.room_terrain(room_id).await });
            async move {
                match task.await {
                    Ok(Ok(terrain)) => Ok(terrain),
                    Ok(Err(e)) => Err(UpstreamError::Terrain {
                        room_id,
                        source: Box::new(e),
                    }),
                    Err(e) => Err(UpstreamError::TaskFailed(e.to_string())),
                }
            }
        })
        .collect();

    let mut loaded = 0;
    while let Some(result) = fetches.next().await {
        // Dropping the remaining join handles detaches them; the error ends startup.
        tables.insert_terrain(result?);
        loaded += 1;
    }

    info!(rooms = loaded, "Terrain loaded");
    Ok(loaded)
}
