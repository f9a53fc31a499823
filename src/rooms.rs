//! Ephemeral room registry: membership, presence, burn protocol.
//!
//! A room exists while it has members or a pending destruction timer. The
//! registry holds only the sending half of each member's channel; the
//! connection task owns the socket and drops out of the room on close.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
struct Room {
    members: HashMap<u64, UnboundedSender<Message>>,
    destruction: Option<tokio::task::AbortHandle>,
}

struct RegistryInner {
    rooms: HashMap<String, Room>,
    burned: HashSet<String>,
    next_conn_id: u64,
}

pub enum JoinOutcome {
    /// The room id was burned earlier in this process lifetime.
    Burned,
    Joined {
        conn_id: u64,
        /// True when this join brought the room into existence.
        created: bool,
    },
}

#[derive(Clone)]
pub struct RoomRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    grace: Duration,
}

pub fn presence_frame(room_id: &str, count: usize) -> String {
    serde_json::json!({ "type": "presence", "roomId": room_id, "count": count }).to_string()
}

pub fn destroyed_frame(room_id: &str) -> String {
    serde_json::json!({ "type": "roomDestroyed", "roomId": room_id }).to_string()
}

fn broadcast_presence(room_id: &str, room: &Room) {
    let frame = presence_frame(room_id, room.members.len());
    for tx in room.members.values() {
        let _ = tx.send(Message::Text(frame.clone()));
    }
}

impl RoomRegistry {
    /// `grace` is how long an empty room lingers before destruction.
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(Mutex::new(RegistryInner {
                rooms: HashMap::new(),
                burned: HashSet::new(),
                next_conn_id: 0,
            })),
            grace,
        }
    }

    /// Add a socket to a room, cancelling any pending destruction and
    /// broadcasting the new presence count to every member (joiner included).
    pub async fn join(&self, room_id: &str, tx: UnboundedSender<Message>) -> JoinOutcome {
        let mut inner = self.inner.lock().await;
        if inner.burned.contains(room_id) {
            return JoinOutcome::Burned;
        }

        let conn_id = inner.next_conn_id;
        inner.next_conn_id += 1;

        let created = !inner.rooms.contains_key(room_id);
        let room = inner.rooms.entry(room_id.to_string()).or_default();
        if let Some(timer) = room.destruction.take() {
            timer.abort();
        }
        room.members.insert(conn_id, tx);
        broadcast_presence(room_id, room);

        JoinOutcome::Joined { conn_id, created }
    }

    /// Remove a socket. An emptied room is kept addressable for the grace
    /// period; a still-populated one gets a presence broadcast.
    pub async fn leave(&self, room_id: &str, conn_id: u64) {
        let mut inner = self.inner.lock().await;
        let Some(room) = inner.rooms.get_mut(room_id) else {
            return;
        };
        if room.members.remove(&conn_id).is_none() {
            return;
        }

        if room.members.is_empty() {
            let registry = self.clone();
            let key = room_id.to_string();
            let timer = tokio::spawn(async move {
                tokio::time::sleep(registry.grace).await;
                let mut inner = registry.inner.lock().await;
                let still_empty = inner
                    .rooms
                    .get(&key)
                    .is_some_and(|room| room.members.is_empty());
                if still_empty {
                    inner.rooms.remove(&key);
                    debug!(room = %key, "destroyed empty room");
                }
            });
            room.destruction = Some(timer.abort_handle());
        } else {
            broadcast_presence(room_id, room);
        }
    }

    /// Forward a frame verbatim to every member except the sender.
    pub async fn relay_from(&self, room_id: &str, sender_conn: u64, frame: Message) {
        let inner = self.inner.lock().await;
        let Some(room) = inner.rooms.get(room_id) else {
            return;
        };
        for (conn_id, tx) in &room.members {
            if *conn_id != sender_conn {
                let _ = tx.send(frame.clone());
            }
        }
    }

    /// Seal the room id for the rest of the process lifetime, notify every
    /// member (the burner included), and close their sockets.
    pub async fn burn(&self, room_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.burned.insert(room_id.to_string());

        let Some(room) = inner.rooms.remove(room_id) else {
            return;
        };
        if let Some(timer) = room.destruction {
            timer.abort();
        }

        let frame = destroyed_frame(room_id);
        for tx in room.members.values() {
            let _ = tx.send(Message::Text(frame.clone()));
            let _ = tx.send(Message::Close(None));
        }
        debug!(room = %room_id, members = room.members.len(), "room burned");
    }
}
