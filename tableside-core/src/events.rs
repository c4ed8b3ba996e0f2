//! Real-time fan-out of state changes
//!
//! Every mutation in the engine is described by an [`Event`] and handed to an
//! [`EventPublisher`]. The [`Broadcaster`] is the production publisher: it keeps a map of rooms
//! (`role:admin`, `role:waiter`, `role:kitchen`, `table:{n}`, `user:{id}`) to live connections
//! and pushes each event to every connection in the event's target rooms. Table rooms only
//! receive order events and session expiry.
//!
//! Delivery is at-most-once. Nothing is queued for disconnected clients and nothing is replayed;
//! a client that reconnects re-fetches current state over the REST API. Rooms decide relevance,
//! not access: any code that holds the broadcaster may address any room.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{
    order::Order,
    session::TableSession,
    staff::{Role, StaffId, StaffIdentity},
};

/// A named broadcast group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Role(Role),
    Table(u32),
    User(StaffId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Role(role) => write!(f, "role:{role}"),
            Room::Table(n) => write!(f, "table:{n}"),
            Room::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Represents events pushed to real-time subscribers
///
/// Each payload carries the full entity after the change, so clients can apply it as a
/// replace-by-id without keeping diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum Event {
    #[serde(rename = "session:created")]
    SessionCreated(TableSession),
    /// A successful scan changed usage counters.
    #[serde(rename = "session:updated")]
    SessionUpdated(TableSession),
    #[serde(rename = "session:expired")]
    SessionExpired(TableSession),
    #[serde(rename = "session:deleted")]
    SessionDeleted(TableSession),
    #[serde(rename = "order:created")]
    OrderCreated(Order),
    #[serde(rename = "order:statusUpdated")]
    OrderStatusUpdated(Order),
    #[serde(rename = "order:cancelled")]
    OrderCancelled(Order),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionCreated(_) => "session:created",
            Event::SessionUpdated(_) => "session:updated",
            Event::SessionExpired(_) => "session:expired",
            Event::SessionDeleted(_) => "session:deleted",
            Event::OrderCreated(_) => "order:created",
            Event::OrderStatusUpdated(_) => "order:statusUpdated",
            Event::OrderCancelled(_) => "order:cancelled",
        }
    }

    pub fn table_number(&self) -> u32 {
        match self {
            Event::SessionCreated(s)
            | Event::SessionUpdated(s)
            | Event::SessionExpired(s)
            | Event::SessionDeleted(s) => s.table_number,
            Event::OrderCreated(o) | Event::OrderStatusUpdated(o) | Event::OrderCancelled(o) => {
                o.table_number
            }
        }
    }

    /// Rooms interested in this event: all staff roles, the issuing staff member for session
    /// events, and the table for order events and session expiry.
    ///
    /// Table rooms never see a session being created, renewed or deleted, so a device sitting
    /// at a table cannot pick up the token of a session it did not scan.
    pub fn target_rooms(&self) -> Vec<Room> {
        let mut rooms = vec![
            Room::Role(Role::Admin),
            Room::Role(Role::Waiter),
            Room::Role(Role::Kitchen),
        ];

        match self {
            Event::SessionCreated(s) | Event::SessionUpdated(s) | Event::SessionDeleted(s) => {
                rooms.push(Room::User(s.issued_by.clone()));
            }
            Event::SessionExpired(s) => {
                rooms.push(Room::Table(s.table_number));
                rooms.push(Room::User(s.issued_by.clone()));
            }
            Event::OrderCreated(o) | Event::OrderStatusUpdated(o) | Event::OrderCancelled(o) => {
                rooms.push(Room::Table(o.table_number));
            }
        }

        rooms
    }
}

/// The single entry point mutation sites use to announce a change.
///
/// Publishing never fails from the caller's point of view: delivery problems are the
/// publisher's to log and swallow.
pub trait EventPublisher: Send + Sync + 'static {
    fn publish(&self, event: Event);
}

/// A publisher that drops everything, for tools that mutate the store without live clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, event: Event) {
        tracing::trace!(event = event.name(), "Dropping event, no subscribers configured");
    }
}

/// Who is on the other end of a real-time connection. Determines room membership once, at
/// connect time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionIdentity {
    Staff(StaffIdentity),
    /// A customer device holding a valid session token for this table.
    Table(u32),
}

impl ConnectionIdentity {
    pub fn rooms(&self) -> Vec<Room> {
        match self {
            ConnectionIdentity::Staff(staff) => {
                vec![Room::Role(staff.role), Room::User(staff.id.clone())]
            }
            ConnectionIdentity::Table(n) => vec![Room::Table(*n)],
        }
    }
}

pub type ConnectionId = u64;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, mpsc::UnboundedSender<Arc<Event>>>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
}

impl Registry {
    fn remove(&self, id: ConnectionId, rooms: &[Room]) {
        self.connections.remove(&id);
        for room in rooms {
            let now_empty = match self.rooms.get_mut(room) {
                Some(mut members) => {
                    members.remove(&id);
                    members.is_empty()
                }
                None => false,
            };
            if now_empty {
                self.rooms.remove_if(room, |_, members| members.is_empty());
            }
        }
    }
}

/// Room-based pub/sub over in-process channels.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Clone, Default)]
pub struct Broadcaster {
    registry: Arc<Registry>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection in the rooms derived from its identity.
    pub fn subscribe(&self, identity: &ConnectionIdentity) -> Subscription {
        self.subscribe_rooms(identity.rooms())
    }

    /// Register a connection in an explicit set of rooms.
    pub fn subscribe_rooms(&self, rooms: Vec<Room>) -> Subscription {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.registry.connections.insert(id, tx);
        for room in &rooms {
            self.registry.rooms.entry(room.clone()).or_default().insert(id);
        }

        tracing::debug!(
            connection = id,
            rooms = ?rooms.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "Connection subscribed"
        );

        Subscription {
            id,
            rooms,
            receiver: rx,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Deliver `event` once to every connection that is a member of at least one of `rooms`.
    ///
    /// Returns the number of connections the event was handed to.
    pub fn broadcast(&self, event: Event, rooms: &[Room]) -> usize {
        let mut targets = HashSet::new();
        for room in rooms {
            if let Some(members) = self.registry.rooms.get(room) {
                targets.extend(members.iter().copied());
            }
        }

        let event = Arc::new(event);
        let mut delivered = 0;
        let mut stale = Vec::new();

        for id in targets {
            let sent = match self.registry.connections.get(&id) {
                Some(tx) => tx.send(Arc::clone(&event)).is_ok(),
                None => false,
            };
            if sent {
                delivered += 1;
            } else {
                stale.push(id);
            }
        }

        // Receivers dropped without unsubscribing; forget them quietly.
        if !stale.is_empty() {
            let all_rooms: Vec<Room> = self
                .registry
                .rooms
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            for id in stale {
                tracing::debug!(connection = id, "Pruning disconnected subscriber");
                self.registry.remove(id, &all_rooms);
            }
        }

        tracing::trace!(event = event.name(), delivered, "Broadcast event");
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.registry.connections.len()
    }

    /// Member count per room, for health and debugging output.
    pub fn room_sizes(&self) -> HashMap<String, usize> {
        self.registry
            .rooms
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().len()))
            .collect()
    }
}

impl EventPublisher for Broadcaster {
    fn publish(&self, event: Event) {
        let rooms = event.target_rooms();
        self.broadcast(event, &rooms);
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("connections", &self.connection_count())
            .finish()
    }
}

/// A live membership. Dropping it leaves every room it joined.
pub struct Subscription {
    id: ConnectionId,
    rooms: Vec<Room>,
    receiver: mpsc::UnboundedReceiver<Arc<Event>>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    /// Wait for the next event. Returns `None` once the broadcaster has pruned this connection.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.recv().await
    }

    /// Take an already delivered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.receiver.try_recv().ok()
    }

    /// Everything delivered so far.
    pub fn drain(&mut self) -> Vec<Arc<Event>> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.id, &self.rooms);
        tracing::debug!(connection = self.id, "Connection unsubscribed");
    }
}
