//! Store-and-forward mailboxes and the live chat-socket map.
//!
//! The mailbox is the source of truth; a live socket is only a delivery
//! optimization. Senders enqueue first and push second, so a recipient
//! connecting mid-send can never lose a message.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;

use crate::id::now_millis;

/// A queued chat message. `id` is the client-chosen idempotency key.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct QueuedMessage {
    pub id: String,
    pub from: String,
    pub payload: String,
    pub timestamp: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Stored,
    Duplicate,
}

#[derive(Clone)]
pub struct MailboxStore {
    ttl_ms: u64,
    mailboxes: Arc<Mutex<HashMap<String, VecDeque<QueuedMessage>>>>,
}

impl MailboxStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_ms: ttl.as_millis() as u64,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn fresh(&self, message: &QueuedMessage, now: u64) -> bool {
        now.saturating_sub(message.timestamp) <= self.ttl_ms
    }

    /// Append a message unless the recipient already holds one with the same
    /// id. A repeat is an idempotent success, not an error. The timestamp is
    /// assigned under the queue lock, so insertion order and timestamp order
    /// agree.
    pub async fn enqueue(
        &self,
        to: &str,
        id: String,
        from: String,
        payload: String,
    ) -> EnqueueOutcome {
        let mut mailboxes = self.mailboxes.lock().await;
        let queue = mailboxes.entry(to.to_string()).or_default();

        if queue.iter().any(|queued| queued.id == id) {
            return EnqueueOutcome::Duplicate;
        }
        queue.push_back(QueuedMessage {
            id,
            from,
            payload,
            timestamp: now_millis(),
        });
        EnqueueOutcome::Stored
    }

    /// Non-expired messages in insertion order. Does not mutate the queue.
    pub async fn fetch(&self, to: &str) -> Vec<QueuedMessage> {
        let now = now_millis();
        let mailboxes = self.mailboxes.lock().await;
        match mailboxes.get(to) {
            Some(queue) => queue
                .iter()
                .filter(|message| self.fresh(message, now))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Remove exactly the named ids; an emptied mailbox is dropped from the
    /// map entirely.
    pub async fn ack(&self, to: &str, ids: &[String]) {
        let mut mailboxes = self.mailboxes.lock().await;
        if let Some(queue) = mailboxes.get_mut(to) {
            queue.retain(|message| !ids.contains(&message.id));
            if queue.is_empty() {
                mailboxes.remove(to);
            }
        }
    }

    /// Drop messages past the TTL and mailboxes that end up empty.
    /// Returns how many messages were removed.
    pub async fn sweep(&self) -> usize {
        let now = now_millis();
        let mut mailboxes = self.mailboxes.lock().await;
        let mut removed = 0;
        mailboxes.retain(|_, queue| {
            let before = queue.len();
            queue.retain(|message| self.fresh(message, now));
            removed += before - queue.len();
            !queue.is_empty()
        });
        removed
    }
}

struct ChatClient {
    conn_id: u64,
    tx: UnboundedSender<Message>,
}

struct ChatSocketsInner {
    clients: HashMap<String, ChatClient>,
    next_conn_id: u64,
}

/// Fingerprint → live socket sender. At most one socket per fingerprint;
/// a new registration silently replaces the old one.
#[derive(Clone)]
pub struct ChatSockets {
    inner: Arc<Mutex<ChatSocketsInner>>,
}

impl ChatSockets {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChatSocketsInner {
                clients: HashMap::new(),
                next_conn_id: 0,
            })),
        }
    }

    /// Register a socket for a fingerprint, returning the connection id the
    /// caller must present on unregister.
    pub async fn register(&self, fingerprint: &str, tx: UnboundedSender<Message>) -> u64 {
        let mut inner = self.inner.lock().await;
        let conn_id = inner.next_conn_id;
        inner.next_conn_id += 1;
        inner
            .clients
            .insert(fingerprint.to_string(), ChatClient { conn_id, tx });
        conn_id
    }

    /// Clear the map entry only if this connection is still the mapped one,
    /// so a replaced socket closing late cannot evict its successor.
    pub async fn unregister(&self, fingerprint: &str, conn_id: u64) {
        let mut inner = self.inner.lock().await;
        if let Some(client) = inner.clients.get(fingerprint) {
            if client.conn_id == conn_id {
                inner.clients.remove(fingerprint);
            }
        }
    }

    /// Best-effort push of a text frame to the fingerprint's live socket.
    pub async fn push(&self, fingerprint: &str, frame: String) -> bool {
        let inner = self.inner.lock().await;
        match inner.clients.get(fingerprint) {
            Some(client) => client.tx.send(Message::Text(frame)).is_ok(),
            None => false,
        }
    }
}

impl Default for ChatSockets {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn store() -> MailboxStore {
        MailboxStore::new(Duration::from_secs(60))
    }

    async fn enqueue(store: &MailboxStore, to: &str, id: &str) -> EnqueueOutcome {
        store
            .enqueue(to, id.to_string(), "fpA".to_string(), "E1".to_string())
            .await
    }

    #[tokio::test]
    async fn enqueue_deduplicates_by_message_id() {
        let store = store();

        assert_eq!(enqueue(&store, "fpB", "m1").await, EnqueueOutcome::Stored);
        assert_eq!(
            enqueue(&store, "fpB", "m1").await,
            EnqueueOutcome::Duplicate
        );
        assert_eq!(store.fetch("fpB").await.len(), 1);
    }

    #[tokio::test]
    async fn fetch_preserves_insertion_order_without_mutating() {
        let store = store();
        enqueue(&store, "fpB", "m1").await;
        enqueue(&store, "fpB", "m2").await;

        let first = store.fetch("fpB").await;
        assert_eq!(first[0].id, "m1");
        assert_eq!(first[1].id, "m2");
        assert!(first[0].timestamp <= first[1].timestamp);
        assert_eq!(store.fetch("fpB").await, first);
    }

    #[tokio::test]
    async fn ack_removes_named_ids_and_drops_empty_mailboxes() {
        let store = store();
        enqueue(&store, "fpB", "m1").await;
        enqueue(&store, "fpB", "m2").await;

        store.ack("fpB", &["m1".to_string()]).await;
        let remaining = store.fetch("fpB").await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "m2");

        store.ack("fpB", &["m2".to_string()]).await;
        let mailboxes = store.mailboxes.lock().await;
        assert!(!mailboxes.contains_key("fpB"));
    }

    #[tokio::test]
    async fn expired_messages_are_unreadable_and_swept() {
        let store = MailboxStore::new(Duration::from_millis(10));
        enqueue(&store, "fpB", "m1").await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.fetch("fpB").await.is_empty());
        assert_eq!(store.sweep().await, 1);

        let mailboxes = store.mailboxes.lock().await;
        assert!(mailboxes.is_empty());
    }

    #[tokio::test]
    async fn chat_socket_replacement_is_last_writer_wins() {
        let sockets = ChatSockets::new();
        let (old_tx, mut old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();

        let old_conn = sockets.register("fpB", old_tx).await;
        let new_conn = sockets.register("fpB", new_tx).await;
        assert_ne!(old_conn, new_conn);

        assert!(sockets.push("fpB", "frame".to_string()).await);
        assert!(new_rx.try_recv().is_ok());
        assert!(old_rx.try_recv().is_err());

        // The replaced socket closing late must not evict its successor.
        sockets.unregister("fpB", old_conn).await;
        assert!(sockets.push("fpB", "again".to_string()).await);

        sockets.unregister("fpB", new_conn).await;
        assert!(!sockets.push("fpB", "gone".to_string()).await);
    }
}
