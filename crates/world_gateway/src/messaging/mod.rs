//! Wire messages exchanged with subscribers.
//!
//! Inbound control messages are JSON objects tagged by `ty`; outbound frames
//! carry either a room's terrain or its current entities.

pub mod types;

pub use types::{ClientMessage, ServerMessage, SubscriptionCommand};
