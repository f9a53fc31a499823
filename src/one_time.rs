//! One-shot vaults for ciphertext drops and file blobs.
//!
//! An entry is readable exactly once: `take` removes it under the store
//! lock, so of two concurrent readers exactly one observes the payload.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::id::new_id;

struct StoredBlob<T> {
    payload: T,
    stored_at: Instant,
}

/// TTL-bounded store whose entries vanish on first read.
#[derive(Clone)]
pub struct OneTimeStore<T> {
    ttl: Duration,
    entries: Arc<Mutex<HashMap<String, StoredBlob<T>>>>,
}

impl<T> OneTimeStore<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Store a payload under a fresh server-generated id.
    pub async fn put(&self, payload: T) -> String {
        let id = new_id();
        let mut entries = self.entries.lock().await;
        entries.insert(
            id.clone(),
            StoredBlob {
                payload,
                stored_at: Instant::now(),
            },
        );
        id
    }

    /// Atomic compare-and-delete: the entry is removed whether or not it is
    /// still live, and only a live entry yields its payload.
    pub async fn take(&self, id: &str) -> Option<T> {
        let mut entries = self.entries.lock().await;
        let blob = entries.remove(id)?;
        if blob.stored_at.elapsed() > self.ttl {
            return None;
        }
        Some(blob.payload)
    }

    /// Delete entries older than the TTL. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, blob| blob.stored_at.elapsed() <= self.ttl);
        before - entries.len()
    }
}
