//! Grouping key derivation: peers behind the same public address share a room.

use crate::registry::RoomId;
use std::net::IpAddr;

/// Prefix of every derived room id.
pub const ROOM_PREFIX: &str = "room_";

/// Header set by reverse proxies (Render, Cloudflare, nginx) with the client chain.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Origin address of a connection: first hop of `forwarded_for` when present and non-empty,
/// otherwise the direct peer address. Trimmed.
pub fn origin_address(forwarded_for: Option<&str>, remote: IpAddr) -> String {
    forwarded_for
        .and_then(|chain| chain.split(',').next())
        .map(str::trim)
        .filter(|first| !first.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| remote.to_string())
}

/// Room id for a connection: [`ROOM_PREFIX`] followed by its origin address.
pub fn room_for_origin(forwarded_for: Option<&str>, remote: IpAddr) -> RoomId {
    format!("{}{}", ROOM_PREFIX, origin_address(forwarded_for, remote))
}
