//! In-process pub/sub keyed by owner. Each owner has one room holding every
//! live connection of that owner.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use dashmap::DashMap;
use shared::{domain::OwnerId, protocol::ServerEvent};
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Sending side of one live connection. Cloning shares the same outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

#[derive(Clone, Default)]
pub struct RoomHub {
    rooms: Arc<DashMap<OwnerId, Vec<ConnectionHandle>>>,
    next_connection_id: Arc<AtomicU64>,
}

impl RoomHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a handle for a new transport connection. The transport drains the receiver.
    pub fn open_connection(&self) -> (ConnectionHandle, EventReceiver) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1);
        (ConnectionHandle { id, sender }, receiver)
    }

    pub fn join(&self, owner: OwnerId, handle: ConnectionHandle) {
        let connection_id = handle.id;
        let mut members = self.rooms.entry(owner).or_default();
        if members.iter().any(|member| member.id == connection_id) {
            return;
        }
        members.push(handle);
        debug!(
            owner_id = owner.0,
            %connection_id,
            room_size = members.len(),
            "connection joined room"
        );
    }

    pub fn leave(&self, owner: OwnerId, connection_id: ConnectionId) {
        let removed = self
            .rooms
            .remove_if_mut(&owner, |_, members| {
                members.retain(|member| member.id != connection_id);
                members.is_empty()
            })
            .is_some();
        if removed {
            debug!(owner_id = owner.0, %connection_id, "room emptied and removed");
        }
    }

    /// Delivers `event` to every connection in the owner's room and returns how many were reached.
    ///
    /// Connections whose receiver is gone are dropped from the room. An empty or unknown room
    /// reaches nobody.
    pub fn multicast(&self, owner: OwnerId, event: ServerEvent) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        if let Some(members) = self.rooms.get(&owner) {
            for member in members.iter() {
                if member.send(event.clone()) {
                    delivered += 1;
                } else {
                    closed.push(member.id);
                }
            }
        }

        for connection_id in closed {
            warn!(
                owner_id = owner.0,
                %connection_id,
                event_type = event.event_type(),
                "connection receiver gone, pruning from room"
            );
            self.leave(owner, connection_id);
        }

        debug!(
            owner_id = owner.0,
            event_type = event.event_type(),
            delivered,
            "multicast"
        );
        delivered
    }

    pub fn unicast(&self, handle: &ConnectionHandle, event: ServerEvent) -> bool {
        let event_type = event.event_type();
        let delivered = handle.send(event);
        if !delivered {
            debug!(connection_id = %handle.id, event_type, "unicast target already closed");
        }
        delivered
    }

    pub fn room_size(&self, owner: OwnerId) -> usize {
        self.rooms.get(&owner).map(|members| members.len()).unwrap_or(0)
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[cfg(test)]
#[path = "tests/rooms_tests.rs"]
mod tests;
