//! Two-party invite rendezvous.
//!
//! The creator parks a public key bundle under a client-chosen id; the
//! counterparty claims it exactly once, leaving its own bundle behind.
//! Both sides can then read the record until it expires.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::id::now_millis;

struct StoredInvite {
    creator_bundle: String,
    claimer_bundle: Option<String>,
    expires_at: u64,
}

impl StoredInvite {
    fn expired(&self, now: u64) -> bool {
        self.expires_at <= now
    }
}

/// Read-only view of an invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteView {
    pub invite_id: String,
    pub creator_bundle: String,
    pub claimed: bool,
    pub claimer_bundle: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    Duplicate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed { creator_bundle: String },
    AlreadyClaimed,
    Gone,
}

#[derive(Clone)]
pub struct InviteStore {
    default_ttl_ms: u64,
    entries: Arc<Mutex<HashMap<String, StoredInvite>>>,
}

impl InviteStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl_ms: default_ttl.as_millis() as u64,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Park a creator bundle. A live entry under the same id rejects the
    /// create; an expired one is replaced.
    pub async fn create(
        &self,
        invite_id: &str,
        creator_bundle: String,
        expires_at: Option<u64>,
    ) -> CreateOutcome {
        let now = now_millis();
        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.get(invite_id) {
            if !existing.expired(now) {
                return CreateOutcome::Duplicate;
            }
        }

        entries.insert(
            invite_id.to_string(),
            StoredInvite {
                creator_bundle,
                claimer_bundle: None,
                expires_at: expires_at.unwrap_or(now + self.default_ttl_ms),
            },
        );
        CreateOutcome::Created
    }

    /// Readable before and after the claim; expired entries are deleted on
    /// read and reported as gone.
    pub async fn get(&self, invite_id: &str) -> Option<InviteView> {
        let now = now_millis();
        let mut entries = self.entries.lock().await;

        match entries.get(invite_id) {
            Some(invite) if invite.expired(now) => {
                entries.remove(invite_id);
                None
            }
            Some(invite) => Some(InviteView {
                invite_id: invite_id.to_string(),
                creator_bundle: invite.creator_bundle.clone(),
                claimed: invite.claimer_bundle.is_some(),
                claimer_bundle: invite.claimer_bundle.clone(),
            }),
            None => None,
        }
    }

    /// The single transition out of `unclaimed`. Succeeds at most once per
    /// invite; the claimer bundle is immutable afterwards.
    pub async fn claim(&self, invite_id: &str, claimer_bundle: String) -> ClaimOutcome {
        let now = now_millis();
        let mut entries = self.entries.lock().await;

        let Some(invite) = entries.get_mut(invite_id) else {
            return ClaimOutcome::Gone;
        };
        if invite.expired(now) {
            entries.remove(invite_id);
            return ClaimOutcome::Gone;
        }
        if invite.claimer_bundle.is_some() {
            return ClaimOutcome::AlreadyClaimed;
        }

        invite.claimer_bundle = Some(claimer_bundle);
        ClaimOutcome::Claimed {
            creator_bundle: invite.creator_bundle.clone(),
        }
    }

    /// Delete entries past their expiry. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = now_millis();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, invite| !invite.expired(now));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InviteStore {
        InviteStore::new(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn create_then_duplicate() {
        let store = store();
        assert_eq!(
            store.create("inv1", "K1".into(), None).await,
            CreateOutcome::Created
        );
        assert_eq!(
            store.create("inv1", "K1".into(), None).await,
            CreateOutcome::Duplicate
        );
    }

    #[tokio::test]
    async fn claim_succeeds_exactly_once() {
        let store = store();
        store.create("inv1", "K1".into(), None).await;

        assert_eq!(
            store.claim("inv1", "K2".into()).await,
            ClaimOutcome::Claimed {
                creator_bundle: "K1".into()
            }
        );
        assert_eq!(
            store.claim("inv1", "K3".into()).await,
            ClaimOutcome::AlreadyClaimed
        );

        // The first claimer's bundle is what sticks.
        let view = store.get("inv1").await.unwrap();
        assert!(view.claimed);
        assert_eq!(view.claimer_bundle.as_deref(), Some("K2"));
    }

    #[tokio::test]
    async fn get_is_idempotent_across_claim() {
        let store = store();
        store.create("inv1", "K1".into(), None).await;

        let before = store.get("inv1").await.unwrap();
        assert!(!before.claimed);
        assert_eq!(before.claimer_bundle, None);
        assert_eq!(store.get("inv1").await.unwrap(), before);

        store.claim("inv1", "K2".into()).await;
        let after = store.get("inv1").await.unwrap();
        assert_eq!(after.creator_bundle, "K1");
        assert_eq!(store.get("inv1").await.unwrap(), after);
    }

    #[tokio::test]
    async fn unknown_invite_is_gone() {
        let store = store();
        assert_eq!(store.get("missing").await, None);
        assert_eq!(store.claim("missing", "K".into()).await, ClaimOutcome::Gone);
    }

    #[tokio::test]
    async fn client_expiry_overrides_default() {
        let store = store();
        // Already in the past: entry is born expired.
        store.create("inv1", "K1".into(), Some(1)).await;

        assert_eq!(store.get("inv1").await, None);
        assert_eq!(store.claim("inv1", "K2".into()).await, ClaimOutcome::Gone);

        // Expired means the id is free again.
        assert_eq!(
            store.create("inv1", "K9".into(), None).await,
            CreateOutcome::Created
        );
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let store = store();
        store.create("dead", "K1".into(), Some(1)).await;
        store.create("live", "K2".into(), None).await;

        assert_eq!(store.sweep().await, 1);
        assert!(store.get("live").await.is_some());
    }
}
