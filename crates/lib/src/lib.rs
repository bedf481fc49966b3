//! Beacon core library: peer registry, grouping-key derivation, and the WebSocket gateway
//! that lets peers on the same network find each other.

pub mod config;
pub mod gateway;
pub mod grouping;
pub mod registry;
