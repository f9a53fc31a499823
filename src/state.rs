//! Shared application state.

use std::time::Duration;

use crate::invites::InviteStore;
use crate::mailbox::{ChatSockets, MailboxStore};
use crate::one_time::OneTimeStore;
use crate::rate_limit::RateLimiter;
use crate::rooms::RoomRegistry;
use crate::totals::TotalsSink;

pub const OTM_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const FILE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const INVITE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const MAILBOX_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const ROOM_GRACE: Duration = Duration::from_secs(5);

/// Every store is process-local and separately lockable; the totals sink is
/// the only state that crosses the process boundary.
#[derive(Clone)]
pub struct AppState {
    pub otm: OneTimeStore<String>,
    pub files: OneTimeStore<Vec<u8>>,
    pub invites: InviteStore,
    pub mailboxes: MailboxStore,
    pub chat_sockets: ChatSockets,
    pub rooms: RoomRegistry,
    pub rate_limiter: RateLimiter,
    pub totals: TotalsSink,
}

impl AppState {
    pub fn new(totals: TotalsSink) -> Self {
        Self {
            otm: OneTimeStore::new(OTM_TTL),
            files: OneTimeStore::new(FILE_TTL),
            invites: InviteStore::new(INVITE_TTL),
            mailboxes: MailboxStore::new(MAILBOX_TTL),
            chat_sockets: ChatSockets::new(),
            rooms: RoomRegistry::new(ROOM_GRACE),
            rate_limiter: RateLimiter::new(),
            totals,
        }
    }
}
