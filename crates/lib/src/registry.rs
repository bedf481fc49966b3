//! Peer registry: who is connected, which room they are in, and who must hear about it.
//!
//! Rooms are not stored as entities. A room is the set of peers whose `room_id` matches,
//! kept as an index that is updated in the same critical section as the peer records,
//! and dropped as soon as it is empty.
//!
//! `join` and `disconnect` hand back the connections that should receive the resulting
//! event wrapped in a [`Committed`], which keeps the write lock until it is dropped. The
//! caller queues its frames while holding it, so two changes are always delivered in the
//! order they were applied. Only non-blocking queueing belongs there, never socket I/O.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockWriteGuard};

/// Caller-supplied peer identifier (opaque string).
pub type PeerId = String;

/// Room identifier derived from the grouping key (see [`crate::grouping`]).
pub type RoomId = String;

/// Opaque handle of the transport connection that owns a peer.
pub type ConnectionId = String;

/// Name used when a join does not carry one.
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// A registered peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub peer_id: PeerId,
    pub display_name: String,
    pub connection: ConnectionId,
    pub room_id: RoomId,
}

impl Peer {
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.peer_id.clone(),
            name: self.display_name.clone(),
        }
    }
}

/// Public view of a peer, as sent in `peer_joined` and `existing_peers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub name: String,
}

/// Result of a successful join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The joining peer, to be announced as `peer_joined`.
    pub peer: PeerInfo,
    pub room_id: RoomId,
    /// Connections of the other room members (the joiner is never included).
    pub recipients: Vec<ConnectionId>,
    /// Other room members, reported back to the joiner only. Sorted by peer id.
    pub existing_peers: Vec<PeerInfo>,
}

/// A peer that left its room, and the remaining members that should be told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub peer_id: PeerId,
    pub room_id: RoomId,
    pub recipients: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
struct RegistryState {
    peers: HashMap<PeerId, Peer>,
    /// room_id -> members; never holds an empty set.
    rooms: HashMap<RoomId, BTreeSet<PeerId>>,
    /// connection -> the peer it currently owns.
    connections: HashMap<ConnectionId, PeerId>,
}

impl RegistryState {
    /// Remove a peer record and its index entries. Returns the removed record.
    fn remove_peer(&mut self, peer_id: &str) -> Option<Peer> {
        let peer = self.peers.remove(peer_id)?;
        if let Some(members) = self.rooms.get_mut(&peer.room_id) {
            members.remove(peer_id);
            if members.is_empty() {
                self.rooms.remove(&peer.room_id);
            }
        }
        if self.connections.get(&peer.connection).map(String::as_str) == Some(peer_id) {
            self.connections.remove(&peer.connection);
        }
        Some(peer)
    }

    /// Members of `room_id` other than `exclude`, in peer id order.
    fn others_in_room<'a>(
        &'a self,
        room_id: &str,
        exclude: &'a str,
    ) -> impl Iterator<Item = &'a Peer> + 'a {
        self.rooms
            .get(room_id)
            .into_iter()
            .flatten()
            .filter(move |id| id.as_str() != exclude)
            .filter_map(move |id| self.peers.get(id))
    }

    fn departure(&self, peer: Peer) -> Departure {
        let recipients = self
            .others_in_room(&peer.room_id, &peer.peer_id)
            .map(|p| p.connection.clone())
            .collect();
        Departure {
            peer_id: peer.peer_id,
            room_id: peer.room_id,
            recipients,
        }
    }
}

/// Result of a registry change, still holding the registry's write lock.
///
/// Queue the events for `value` and drop it; `into_inner` releases the lock immediately.
pub struct Committed<'a, T> {
    value: T,
    _guard: RwLockWriteGuard<'a, RegistryState>,
}

impl<T> Committed<'_, T> {
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Committed<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// Shared, lock-guarded peer registry. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<RegistryState>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `peer_id` in `room_id` on `connection`, replacing any previous registration
    /// of the same peer id without a leave event.
    ///
    /// Returns `None` (and changes nothing) when `peer_id` is empty. If `connection` already
    /// owned a different peer id, that registration is retired silently, like a replace.
    pub async fn join(
        &self,
        peer_id: &str,
        display_name: Option<String>,
        room_id: RoomId,
        connection: ConnectionId,
    ) -> Option<Committed<'_, JoinOutcome>> {
        if peer_id.is_empty() {
            return None;
        }
        let display_name = display_name.unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());

        let mut state = self.inner.write().await;

        let previous_owner = state
            .connections
            .get(&connection)
            .filter(|owner| owner.as_str() != peer_id)
            .cloned();
        if let Some(old) = previous_owner.and_then(|owner| state.remove_peer(&owner)) {
            log::debug!(
                "{} retired peer {} in favour of {}",
                old.connection,
                old.peer_id,
                peer_id
            );
        }

        // Same peer id: silent replace, wherever it was registered before.
        state.remove_peer(peer_id);

        let peer = Peer {
            peer_id: peer_id.to_string(),
            display_name,
            connection: connection.clone(),
            room_id: room_id.clone(),
        };
        let info = peer.info();
        state.peers.insert(peer.peer_id.clone(), peer);
        state
            .rooms
            .entry(room_id.clone())
            .or_default()
            .insert(peer_id.to_string());
        state.connections.insert(connection, peer_id.to_string());

        let (recipients, existing_peers): (Vec<_>, Vec<_>) = state
            .others_in_room(&room_id, peer_id)
            .map(|p| (p.connection.clone(), p.info()))
            .unzip();

        Some(Committed {
            value: JoinOutcome {
                peer: info,
                room_id,
                recipients,
                existing_peers,
            },
            _guard: state,
        })
    }

    /// Remove the peer owned by `connection`. Returns `None` if the connection owns no peer
    /// (never joined, or its registration was replaced by a later join).
    pub async fn disconnect(&self, connection: &str) -> Option<Committed<'_, Departure>> {
        let mut state = self.inner.write().await;
        let peer_id = state.connections.get(connection)?.clone();
        let peer = state.remove_peer(&peer_id)?;
        let departure = state.departure(peer);
        Some(Committed {
            value: departure,
            _guard: state,
        })
    }

    /// Current members of a room, sorted by peer id.
    pub async fn room_members(&self, room_id: &str) -> Vec<PeerInfo> {
        let state = self.inner.read().await;
        state.others_in_room(room_id, "").map(Peer::info).collect()
    }

    pub async fn room_of(&self, peer_id: &str) -> Option<RoomId> {
        let state = self.inner.read().await;
        state.peers.get(peer_id).map(|p| p.room_id.clone())
    }

    pub async fn peer_count(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    pub async fn room_count(&self) -> usize {
        self.inner.read().await.rooms.len()
    }
}
