//! Gateway: HTTP + WebSocket front door for the registry.
//!
//! Single port serves the liveness endpoint and the WebSocket. Peers send `join`; the
//! gateway routes `peer_joined`, `existing_peers` and `peer_left` to the right connections.

mod connections;
mod protocol;
mod server;

pub use connections::{ConnectionTable, Delivery, SendError};
pub use protocol::{ClientEvent, EventFrame, FrameError, JoinParams, ServerEvent};
pub use server::{router, run_gateway, GatewayState, HEALTH_TEXT};
