//! Gateway server implementation.
//!
//! [`GatewayServer`] wires the hub, the upstream reader and the terrain
//! bootstrap together and runs the subscriber accept loop.

pub mod core;
pub mod handlers;

pub use self::core::GatewayServer;
